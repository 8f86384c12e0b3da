//! tg-token
//!
//! `PermissionToken`: a time-bound, single-use capability binding one
//! execution to the market facts it was approved under.
//!
//! All terms are private and read through accessors; there are no setters.
//! The only mutable state is the consumption timestamp, held in a `OnceLock`
//! so `consume` is an atomic check-and-set: under a race exactly one caller
//! wins and every other caller sees `TokenReuse`.
//!
//! A token is deliberately not `Clone`. A clone would carry its own
//! consumption flag and could be redeemed a second time in-process. Share it
//! by reference or `Arc` instead. Cross-process single use is enforced by the
//! durable consumed-marker in the state store, not here.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tg_schemas::{AlignmentState, MarketMode, Scenario};
use uuid::Uuid;

/// Lifetime of every token, measured from `created_at`.
pub const TOKEN_LIFETIME: std::time::Duration = std::time::Duration::from_secs(15 * 60);

fn lifetime() -> Duration {
    Duration::seconds(TOKEN_LIFETIME.as_secs() as i64)
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TokenError {
    #[error("token validation failed: {0}")]
    Validation(String),
    #[error("TOKEN_REUSE: token {token_id} already consumed")]
    TokenReuse { token_id: Uuid },
    #[error("TOKEN_EXPIRED: token {token_id} expired at {expires_at}")]
    TokenExpired {
        token_id: Uuid,
        expires_at: DateTime<Utc>,
    },
}

// ---------------------------------------------------------------------------
// TokenTerms
// ---------------------------------------------------------------------------

/// Market facts a token is bound to, minus the risk ceiling.
///
/// The ceiling is supplied separately because it comes from a risk
/// allowance, while the terms come from upstream analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenTerms {
    pub symbol: String,
    pub scenario: Scenario,
    pub mode: MarketMode,
    pub alignment_state: AlignmentState,
    pub probability_active: f64,
}

impl TokenTerms {
    /// Build terms from wire strings. Malformed labels are validation errors.
    pub fn parse(
        symbol: &str,
        scenario: &str,
        mode: &str,
        alignment_state: &str,
        probability_active: f64,
    ) -> Result<Self, TokenError> {
        let parse_err = |e: tg_schemas::ParseError| TokenError::Validation(e.to_string());
        Ok(Self {
            symbol: symbol.to_string(),
            scenario: scenario.parse().map_err(parse_err)?,
            mode: mode.parse().map_err(parse_err)?,
            alignment_state: alignment_state.parse().map_err(parse_err)?,
            probability_active,
        })
    }
}

fn validate(terms: &TokenTerms, max_risk: f64) -> Result<(), TokenError> {
    if terms.symbol.trim().is_empty() {
        return Err(TokenError::Validation("symbol must not be empty".into()));
    }
    if !max_risk.is_finite() || max_risk <= 0.0 {
        return Err(TokenError::Validation(format!(
            "max_risk must be > 0 (got {max_risk})"
        )));
    }
    let p = terms.probability_active;
    if !p.is_finite() || !(0.0..=1.0).contains(&p) {
        return Err(TokenError::Validation(format!(
            "probability_active must be within [0, 1] (got {p})"
        )));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// PermissionToken
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct PermissionToken {
    id: Uuid,
    terms: TokenTerms,
    max_risk: f64,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    used_at: OnceLock<DateTime<Utc>>,
}

/// Lifecycle position of a token at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenState {
    Active,
    Consumed,
    Expired,
}

impl TokenState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenState::Active => "ACTIVE",
            TokenState::Consumed => "CONSUMED",
            TokenState::Expired => "EXPIRED",
        }
    }
}

impl PermissionToken {
    /// Issue a fresh token created now.
    pub fn new(terms: TokenTerms, max_risk: f64) -> Result<Self, TokenError> {
        Self::issue_at(terms, max_risk, Utc::now())
    }

    /// Issue a fresh token with an explicit creation time.
    pub fn issue_at(
        terms: TokenTerms,
        max_risk: f64,
        created_at: DateTime<Utc>,
    ) -> Result<Self, TokenError> {
        validate(&terms, max_risk)?;
        Ok(Self {
            id: Uuid::new_v4(),
            terms,
            max_risk,
            created_at,
            expires_at: created_at + lifetime(),
            used_at: OnceLock::new(),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn symbol(&self) -> &str {
        &self.terms.symbol
    }

    pub fn scenario(&self) -> Scenario {
        self.terms.scenario
    }

    pub fn mode(&self) -> MarketMode {
        self.terms.mode
    }

    pub fn alignment_state_at_issue(&self) -> AlignmentState {
        self.terms.alignment_state
    }

    pub fn probability_active(&self) -> f64 {
        self.terms.probability_active
    }

    pub fn max_risk(&self) -> f64 {
        self.max_risk
    }

    pub fn terms(&self) -> &TokenTerms {
        &self.terms
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_used(&self) -> bool {
        self.used_at.get().is_some()
    }

    pub fn used_at(&self) -> Option<DateTime<Utc>> {
        self.used_at.get().copied()
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Seconds until expiry; negative once expired.
    pub fn time_remaining_at(&self, now: DateTime<Utc>) -> i64 {
        (self.expires_at - now).num_seconds()
    }

    pub fn time_remaining(&self) -> i64 {
        self.time_remaining_at(Utc::now())
    }

    pub fn state_at(&self, now: DateTime<Utc>) -> TokenState {
        if self.is_used() {
            TokenState::Consumed
        } else if self.is_expired_at(now) {
            TokenState::Expired
        } else {
            TokenState::Active
        }
    }

    pub fn status(&self) -> TokenState {
        self.state_at(Utc::now())
    }

    /// Mark the token used at `now`.
    ///
    /// Succeeds exactly once over the token's lifetime. Reuse is reported
    /// before expiry so a spent token always reads as spent.
    pub fn consume_at(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>, TokenError> {
        if self.is_used() {
            return Err(TokenError::TokenReuse { token_id: self.id });
        }
        if self.is_expired_at(now) {
            return Err(TokenError::TokenExpired {
                token_id: self.id,
                expires_at: self.expires_at,
            });
        }
        self.used_at
            .set(now)
            .map_err(|_| TokenError::TokenReuse { token_id: self.id })?;
        Ok(now)
    }

    pub fn consume(&self) -> Result<DateTime<Utc>, TokenError> {
        self.consume_at(Utc::now())
    }

    pub fn to_record(&self) -> TokenRecord {
        TokenRecord {
            token_id: self.id,
            symbol: self.terms.symbol.clone(),
            scenario: self.terms.scenario,
            max_risk: self.max_risk,
            mode: self.terms.mode,
            alignment_state: self.terms.alignment_state,
            probability_active: self.terms.probability_active,
            created_at: self.created_at,
            expires_at: self.expires_at,
            used: self.is_used(),
            used_at: self.used_at(),
        }
    }

    /// Rebuild a token from its record, re-running every construction check.
    ///
    /// The expiry must be exactly `created_at + TOKEN_LIFETIME`; a record
    /// claiming a longer window is rejected.
    pub fn from_record(rec: TokenRecord) -> Result<Self, TokenError> {
        let terms = TokenTerms {
            symbol: rec.symbol,
            scenario: rec.scenario,
            mode: rec.mode,
            alignment_state: rec.alignment_state,
            probability_active: rec.probability_active,
        };
        validate(&terms, rec.max_risk)?;

        if rec.expires_at != rec.created_at + lifetime() {
            return Err(TokenError::Validation(format!(
                "expires_at {} does not match created_at {} + lifetime",
                rec.expires_at, rec.created_at
            )));
        }

        let used_at = OnceLock::new();
        match (rec.used, rec.used_at) {
            (true, Some(at)) => {
                let _ = used_at.set(at);
            }
            (false, None) => {}
            (used, at) => {
                return Err(TokenError::Validation(format!(
                    "inconsistent consumption fields: used={used}, used_at={at:?}"
                )));
            }
        }

        Ok(Self {
            id: rec.token_id,
            terms,
            max_risk: rec.max_risk,
            created_at: rec.created_at,
            expires_at: rec.expires_at,
            used_at,
        })
    }
}

/// Serialisable snapshot of a token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    pub token_id: Uuid,
    pub symbol: String,
    pub scenario: Scenario,
    pub max_risk: f64,
    pub mode: MarketMode,
    pub alignment_state: AlignmentState,
    pub probability_active: f64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used: bool,
    pub used_at: Option<DateTime<Utc>>,
}

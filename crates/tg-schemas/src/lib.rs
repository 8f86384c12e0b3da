//! tg-schemas
//!
//! Shared vocabulary for the permission and risk-control core. Every string
//! that crosses a process boundary (audit lines, state snapshots, CLI flags)
//! goes through `as_str` / `FromStr` here so the wire spelling lives in one
//! place.

mod clock;

pub use clock::{Clock, FixedClock, SystemClock};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// ParseError
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind}: {value:?}")]
pub struct ParseError {
    pub kind: &'static str,
    pub value: String,
}

impl ParseError {
    fn new(kind: &'static str, value: &str) -> Self {
        Self {
            kind,
            value: value.to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Scenario
// ---------------------------------------------------------------------------

/// One of the three mutually exclusive market hypotheses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Scenario {
    /// Continuation.
    A,
    /// Pullback.
    B,
    /// Failure.
    C,
}

impl Scenario {
    pub const ALL: [Scenario; 3] = [Scenario::A, Scenario::B, Scenario::C];

    pub fn as_str(&self) -> &'static str {
        match self {
            Scenario::A => "A",
            Scenario::B => "B",
            Scenario::C => "C",
        }
    }
}

impl FromStr for Scenario {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" | "SCENARIO_A" => Ok(Scenario::A),
            "B" | "SCENARIO_B" => Ok(Scenario::B),
            "C" | "SCENARIO_C" => Ok(Scenario::C),
            _ => Err(ParseError::new("scenario", s)),
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// MarketMode
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketMode {
    Intraday,
    Swing,
}

impl MarketMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            MarketMode::Intraday => "INTRADAY",
            MarketMode::Swing => "SWING",
        }
    }
}

impl FromStr for MarketMode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "INTRADAY" => Ok(MarketMode::Intraday),
            "SWING" => Ok(MarketMode::Swing),
            _ => Err(ParseError::new("market mode", s)),
        }
    }
}

impl fmt::Display for MarketMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// AlignmentState
// ---------------------------------------------------------------------------

/// Agreement of structural analysis across timeframes.
///
/// Stability of a FULL alignment is carried separately (`is_unstable` on the
/// ledger request) because upstream reports it as an independent flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AlignmentState {
    #[serde(rename = "FULL ALIGNMENT")]
    Full,
    #[serde(rename = "PARTIAL ALIGNMENT")]
    Partial,
    #[serde(rename = "UNSTABLE")]
    Unstable,
    #[serde(rename = "CONFLICT")]
    Conflict,
}

impl AlignmentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlignmentState::Full => "FULL ALIGNMENT",
            AlignmentState::Partial => "PARTIAL ALIGNMENT",
            AlignmentState::Unstable => "UNSTABLE",
            AlignmentState::Conflict => "CONFLICT",
        }
    }
}

impl FromStr for AlignmentState {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let norm = s.trim().to_ascii_uppercase().replace(['_', '-'], " ");
        match norm.as_str() {
            "FULL ALIGNMENT" | "FULL" => Ok(AlignmentState::Full),
            "PARTIAL ALIGNMENT" | "PARTIAL" => Ok(AlignmentState::Partial),
            "UNSTABLE" => Ok(AlignmentState::Unstable),
            "CONFLICT" => Ok(AlignmentState::Conflict),
            _ => Err(ParseError::new("alignment state", s)),
        }
    }
}

impl fmt::Display for AlignmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// ExecutionType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionType {
    Manual,
    Auto,
}

impl ExecutionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionType::Manual => "MANUAL",
            ExecutionType::Auto => "AUTO",
        }
    }
}

impl FromStr for ExecutionType {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "MANUAL" => Ok(ExecutionType::Manual),
            "AUTO" => Ok(ExecutionType::Auto),
            _ => Err(ParseError::new("execution type", s)),
        }
    }
}

impl fmt::Display for ExecutionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// SystemState
// ---------------------------------------------------------------------------

/// Circuit-breaker state of the risk ledger.
///
/// Within a trading day the state only ever worsens:
/// `Operational < HaltedToday < Lockdown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SystemState {
    Operational,
    HaltedToday,
    Lockdown,
}

impl SystemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemState::Operational => "OPERATIONAL",
            SystemState::HaltedToday => "HALTED_TODAY",
            SystemState::Lockdown => "LOCKDOWN",
        }
    }

    pub fn is_operational(&self) -> bool {
        matches!(self, SystemState::Operational)
    }

    /// The worse of `self` and `other`.
    pub fn worsen(self, other: SystemState) -> SystemState {
        self.max(other)
    }
}

impl FromStr for SystemState {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OPERATIONAL" => Ok(SystemState::Operational),
            "HALTED_TODAY" => Ok(SystemState::HaltedToday),
            "LOCKDOWN" => Ok(SystemState::Lockdown),
            _ => Err(ParseError::new("system state", s)),
        }
    }
}

impl fmt::Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// GateStep / TokenStatus
// ---------------------------------------------------------------------------

/// The step of the gate pipeline that produced a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GateStep {
    #[serde(rename = "STEP_1")]
    Step1,
    #[serde(rename = "STEP_2")]
    Step2,
    #[serde(rename = "STEP_3")]
    Step3,
    #[serde(rename = "STEP_4")]
    Step4,
    #[serde(rename = "STEP_5")]
    Step5,
    #[serde(rename = "STEP_6")]
    Step6,
    #[serde(rename = "STEP_7")]
    Step7,
}

impl GateStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateStep::Step1 => "STEP_1",
            GateStep::Step2 => "STEP_2",
            GateStep::Step3 => "STEP_3",
            GateStep::Step4 => "STEP_4",
            GateStep::Step5 => "STEP_5",
            GateStep::Step6 => "STEP_6",
            GateStep::Step7 => "STEP_7",
        }
    }
}

impl fmt::Display for GateStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Token status as seen by the gate at the time of an attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenStatus {
    Missing,
    Valid,
    Reused,
    Expired,
    /// Not a token the ledger issued, or not on the terms it was issued with.
    Unrecognized,
    Error,
}

impl TokenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStatus::Missing => "MISSING",
            TokenStatus::Valid => "VALID",
            TokenStatus::Reused => "REUSED",
            TokenStatus::Expired => "EXPIRED",
            TokenStatus::Unrecognized => "UNRECOGNIZED",
            TokenStatus::Error => "ERROR",
        }
    }
}

// ---------------------------------------------------------------------------
// ScenarioProbabilities
// ---------------------------------------------------------------------------

/// Live per-scenario probabilities as reported by upstream analysis.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct ScenarioProbabilities {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl ScenarioProbabilities {
    pub fn new(a: f64, b: f64, c: f64) -> Self {
        Self { a, b, c }
    }

    pub fn get(&self, scenario: Scenario) -> f64 {
        match scenario {
            Scenario::A => self.a,
            Scenario::B => self.b,
            Scenario::C => self.c,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alignment_parses_long_and_short_spellings() {
        assert_eq!("FULL ALIGNMENT".parse::<AlignmentState>().unwrap(), AlignmentState::Full);
        assert_eq!("full".parse::<AlignmentState>().unwrap(), AlignmentState::Full);
        assert_eq!("PARTIAL_ALIGNMENT".parse::<AlignmentState>().unwrap(), AlignmentState::Partial);
        assert_eq!("conflict".parse::<AlignmentState>().unwrap(), AlignmentState::Conflict);
        assert!("SIDEWAYS".parse::<AlignmentState>().is_err());
    }

    #[test]
    fn scenario_accepts_prefixed_labels() {
        assert_eq!("SCENARIO_B".parse::<Scenario>().unwrap(), Scenario::B);
        assert_eq!("c".parse::<Scenario>().unwrap(), Scenario::C);
        let err = "D".parse::<Scenario>().unwrap_err();
        assert_eq!(err.kind, "scenario");
    }

    #[test]
    fn system_state_only_worsens() {
        let s = SystemState::HaltedToday;
        assert_eq!(s.worsen(SystemState::Operational), SystemState::HaltedToday);
        assert_eq!(s.worsen(SystemState::Lockdown), SystemState::Lockdown);
        assert_eq!(SystemState::Lockdown.worsen(SystemState::HaltedToday), SystemState::Lockdown);
    }

    #[test]
    fn wire_spellings_match_as_str() {
        let v = serde_json::to_value(AlignmentState::Full).unwrap();
        assert_eq!(v, serde_json::json!("FULL ALIGNMENT"));
        let v = serde_json::to_value(SystemState::HaltedToday).unwrap();
        assert_eq!(v, serde_json::json!("HALTED_TODAY"));
        let v = serde_json::to_value(GateStep::Step7).unwrap();
        assert_eq!(v, serde_json::json!("STEP_7"));
        let v = serde_json::to_value(Scenario::B).unwrap();
        assert_eq!(v, serde_json::json!("B"));
    }

    #[test]
    fn probabilities_lookup_by_scenario() {
        let p = ScenarioProbabilities::new(0.6, 0.3, 0.1);
        assert_eq!(p.get(Scenario::A), 0.6);
        assert_eq!(p.get(Scenario::C), 0.1);
    }
}

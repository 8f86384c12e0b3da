use anyhow::{Context, Result};
use clap::Subcommand;
use serde_json::json;
use std::path::PathBuf;
use tg_risk::EvaluateRequest;
use tg_schemas::{AlignmentState, Scenario};
use tracing::warn;

use super::{load_session, print_json, write_json, Outcome};

#[derive(Subcommand)]
pub enum RiskCmd {
    /// Print the ledger's current state, limits and counters
    Status,

    /// Evaluate a trade idea into a risk allowance
    Evaluate {
        #[arg(long)]
        symbol: String,

        /// A | B | C
        #[arg(long)]
        scenario: Scenario,

        /// Live probability of the scenario, in [0, 1]
        #[arg(long)]
        probability: f64,

        /// FULL | PARTIAL | UNSTABLE | CONFLICT
        #[arg(long)]
        alignment: AlignmentState,

        /// FULL alignment is currently unstable
        #[arg(long, default_value_t = false)]
        unstable: bool,

        #[arg(long)]
        sector: Option<String>,

        /// On approval, mint a permission token and write it here
        #[arg(long = "token-out")]
        token_out: Option<PathBuf>,
    },

    /// Book an opened position
    RecordEntry {
        #[arg(long)]
        symbol: String,

        #[arg(long)]
        sector: Option<String>,

        /// Fraction of equity put at risk (e.g. 0.002)
        #[arg(long = "risk-fraction")]
        risk_fraction: f64,
    },

    /// Book a closed trade's realized pnl
    RecordOutcome {
        #[arg(long)]
        symbol: String,

        /// Realized pnl in account currency (negative for a loss)
        #[arg(long, allow_hyphen_values = true)]
        pnl: f64,

        /// Fraction of equity the position had at risk
        #[arg(long = "risk-used", default_value_t = 0.0)]
        risk_used: f64,
    },

    /// Start a new trading day (lifts HALTED_TODAY, never LOCKDOWN)
    ResetDaily,

    /// Exit LOCKDOWN with the acknowledgement code
    ResetLockdown {
        #[arg(long)]
        code: String,
    },
}

pub fn run(config_paths: &[String], cmd: RiskCmd) -> Result<Outcome> {
    let session = load_session(config_paths)?;
    let mut ledger = session.ledger()?;

    match cmd {
        RiskCmd::Status => {
            print_json(&ledger.status())?;
            Ok(Outcome::Done)
        }

        RiskCmd::Evaluate {
            symbol,
            scenario,
            probability,
            alignment,
            unstable,
            sector,
            token_out,
        } => {
            let allowance = ledger.evaluate(&EvaluateRequest {
                symbol,
                scenario,
                active_probability: probability,
                alignment,
                is_unstable: unstable,
                sector,
            });
            if !allowance.allowed {
                print_json(&json!({ "allowance": allowance, "token": null }))?;
                return Ok(Outcome::Refused);
            }

            let token = match token_out {
                Some(path) => {
                    let token = ledger
                        .mint_token(&allowance)
                        .context("mint permission token")?;
                    ledger.consume_allowance(allowance.id);
                    let record = token.to_record();
                    write_json(&path, &record)?;
                    Some(record)
                }
                None => None,
            };
            print_json(&json!({ "allowance": allowance, "token": token }))?;
            Ok(Outcome::Done)
        }

        RiskCmd::RecordEntry {
            symbol,
            sector,
            risk_fraction,
        } => {
            ledger.record_entry(&symbol, sector.as_deref(), risk_fraction)?;
            print_json(&ledger.status())?;
            Ok(Outcome::Done)
        }

        RiskCmd::RecordOutcome {
            symbol,
            pnl,
            risk_used,
        } => {
            ledger.record_outcome(&symbol, pnl, risk_used)?;
            print_json(&ledger.status())?;
            Ok(Outcome::Done)
        }

        RiskCmd::ResetDaily => {
            ledger.reset_daily_state()?;
            print_json(&ledger.status())?;
            Ok(Outcome::Done)
        }

        RiskCmd::ResetLockdown { code } => {
            let accepted = ledger.manual_reset_lockdown(&code)?;
            print_json(&json!({ "accepted": accepted, "status": ledger.status() }))?;
            if !accepted {
                warn!("lockdown reset refused");
                return Ok(Outcome::Refused);
            }
            Ok(Outcome::Done)
        }
    }
}

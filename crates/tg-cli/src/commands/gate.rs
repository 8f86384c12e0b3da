use anyhow::{Context, Result};
use clap::Subcommand;
use std::path::PathBuf;
use tg_gate::{ExecutionGatekeeper, GateRequest};
use tg_schemas::{
    AlignmentState, ExecutionType, MarketMode, Scenario, ScenarioProbabilities, SystemClock,
};
use tg_token::{PermissionToken, TokenRecord};

use super::{load_session, print_json, read_json, Outcome};

#[derive(Subcommand)]
pub enum GateCmd {
    /// Redeem a token file against live market facts
    Redeem {
        /// Token JSON written by `risk evaluate --token-out`; omit to record a
        /// token-less attempt
        #[arg(long)]
        token: Option<PathBuf>,

        #[arg(long)]
        symbol: Option<String>,

        #[arg(long, default_value = "15m")]
        timeframe: String,

        /// Live active scenario: A | B | C
        #[arg(long)]
        scenario: Scenario,

        #[arg(long = "prob-a")]
        prob_a: f64,

        #[arg(long = "prob-b")]
        prob_b: f64,

        #[arg(long = "prob-c")]
        prob_c: f64,

        /// Live alignment: FULL | PARTIAL | UNSTABLE | CONFLICT
        #[arg(long)]
        alignment: AlignmentState,

        /// Amount to put at risk, in account currency
        #[arg(long)]
        risk: f64,

        /// INTRADAY | SWING (defaults to the session mode)
        #[arg(long)]
        mode: Option<MarketMode>,

        /// MANUAL | AUTO
        #[arg(long, default_value = "MANUAL")]
        execution: ExecutionType,
    },
}

pub fn run(config_paths: &[String], cmd: GateCmd) -> Result<Outcome> {
    let session = load_session(config_paths)?;

    match cmd {
        GateCmd::Redeem {
            token,
            symbol,
            timeframe,
            scenario,
            prob_a,
            prob_b,
            prob_c,
            alignment,
            risk,
            mode,
            execution,
        } => {
            let token = match token {
                Some(path) => {
                    let record: TokenRecord = read_json(&path)?;
                    Some(PermissionToken::from_record(record).context("invalid token file")?)
                }
                None => None,
            };
            let symbol = match (symbol, &token) {
                (Some(s), _) => s,
                (None, Some(t)) => t.symbol().to_string(),
                (None, None) => anyhow::bail!("--symbol is required without --token"),
            };

            let gate = ExecutionGatekeeper::new(session.audit()?, session.store()?, SystemClock);
            let decision = gate.evaluate(
                token.as_ref(),
                &GateRequest {
                    symbol,
                    timeframe,
                    scenario_active: scenario,
                    probabilities: ScenarioProbabilities::new(prob_a, prob_b, prob_c),
                    alignment_state: alignment,
                    risk_requested: risk,
                    market_mode: mode.unwrap_or(session.config.session.mode),
                    execution_type: execution,
                },
            )?;
            print_json(&decision)?;
            Ok(if decision.allowed {
                Outcome::Done
            } else {
                Outcome::Refused
            })
        }
    }
}

//! tg-gate
//!
//! The final wall before execution. `ExecutionGatekeeper::evaluate` redeems
//! a `PermissionToken` against live market facts through seven ordered
//! steps and records every attempt, allowed or blocked, in the audit trail
//! before it returns.
//!
//! Blocks are values (`GateDecision { allowed: false, .. }`), never errors.
//! The only error is an unrecordable attempt, which is never a permission.

mod decision;
mod pipeline;
pub mod policy;

pub use decision::{BlockCode, GateDecision, GateError, GateRequest};
pub use pipeline::{ExecutionGatekeeper, TokenRegistry, ALL_CHECKS_PASSED};
pub use policy::{AUTO_PROBABILITY_THRESHOLD, INTRADAY_CUTOFF, MARKET_TZ};

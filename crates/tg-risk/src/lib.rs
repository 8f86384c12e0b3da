//! tg-risk
//!
//! Capital-preservation governor.
//!
//! - `caps`: fixed per-mode limits and multiplier tables
//! - `engine`: pure, deterministic vetoes and sizing over `&mut LedgerState`
//! - `restore`: rebuild state at startup from snapshot + today's rows
//! - `ledger`: the session service that wires engine, store and clock, and
//!   mints permission tokens from allowances
//!
//! The engine never does IO and never reads the clock; the ledger does both.

pub mod caps;
mod engine;
mod ledger;
mod restore;
mod types;

pub use caps::{
    alignment_factor, allowance_lifetime, loss_streak_multiplier, RiskCaps, HALT_STREAK,
    LOCKDOWN_ACK_CODE, LOCKDOWN_STREAK,
};
pub use engine::{apply_entry, apply_outcome, assess, manual_reset, reset_daily};
pub use ledger::{token_registration, MintError, RiskLedger, SharedLedger};
pub use restore::restore_state;
pub use types::*;

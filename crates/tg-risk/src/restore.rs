//! Startup reconstruction of ledger state.
//!
//! Fail-closed: a crash-restart must never come back less restricted than
//! the ledger was before the crash. Restore therefore only ever carries
//! restrictions forward; it never invents an improvement.

use chrono::NaiveDate;
use tg_schemas::{MarketMode, SystemState};
use tg_store::{DailyLedgerRow, LedgerRowKind, SessionSnapshot};

use crate::engine::{
    apply_streak, book_daily_usage, clear_daily_usage, enforce_breakers, open_position,
    release_position,
};
use crate::types::LedgerState;

/// Rebuild state for `today` from the latest snapshot and today's rows.
///
/// - Streak, counters, open positions/risk and `LOCKDOWN` come from the
///   snapshot unconditionally.
/// - `HALTED_TODAY` comes from the snapshot only if it was taken today.
/// - Today's rows re-derive pnl and per-symbol/sector usage, in append
///   order. Rows newer than the snapshot also replay position and streak
///   effects, covering a crash between the row write and the snapshot write.
/// - A reset marker clears what its reset cleared: everything daily for
///   `DailyReset`, the pnl for `LockdownReset`. Only the accumulators; the
///   state a reset lifted comes from the snapshot written after the marker,
///   so a crash between the two comes back still restricted.
/// - The breakers are re-checked last, so a breached day halts again.
pub fn restore_state(
    session_id: &str,
    mode: MarketMode,
    account_equity: f64,
    today: NaiveDate,
    snapshot: Option<&SessionSnapshot>,
    today_rows: &[DailyLedgerRow],
) -> LedgerState {
    let mut st = LedgerState::new(session_id, mode, account_equity, today);

    if let Some(snap) = snapshot {
        st.loss_streak = snap.loss_streak;
        st.max_loss_streak = snap.max_loss_streak.max(snap.loss_streak);
        st.total_decisions = snap.total_decisions;
        st.wins = snap.wins;
        st.losses = snap.losses;
        st.open_positions = snap.open_positions;
        st.open_risk = snap.open_risk;
        st.system_state = match snap.final_state {
            SystemState::Lockdown => SystemState::Lockdown,
            SystemState::HaltedToday if snap.trading_date == today => SystemState::HaltedToday,
            _ => SystemState::Operational,
        };
    }

    for row in today_rows.iter().filter(|r| r.trading_date == today) {
        let after_snapshot = snapshot.map_or(true, |s| row.recorded_at > s.recorded_at);
        match row.kind {
            LedgerRowKind::Entry => {
                book_daily_usage(&mut st, &row.symbol, row.sector.as_deref(), row.risk_used);
                if after_snapshot {
                    open_position(&mut st, row.risk_used);
                }
            }
            LedgerRowKind::Outcome => {
                st.daily_realized_pnl += row.realized_pnl;
                if after_snapshot {
                    release_position(&mut st, row.risk_used);
                    apply_streak(&mut st, row.realized_pnl);
                }
            }
            LedgerRowKind::DailyReset => clear_daily_usage(&mut st),
            LedgerRowKind::LockdownReset => st.daily_realized_pnl = 0.0,
        }
    }

    enforce_breakers(&mut st);
    st
}

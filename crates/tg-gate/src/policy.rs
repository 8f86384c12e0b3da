//! Fixed gate policy. These are compiled in, never read from config.

use chrono::{DateTime, NaiveTime, Utc};
use chrono_tz::Tz;

/// Exchange timezone the intraday cutoff is defined in.
pub const MARKET_TZ: Tz = chrono_tz::Asia::Kolkata;

/// INTRADAY executions are refused strictly after this local time.
pub const INTRADAY_CUTOFF: NaiveTime = match NaiveTime::from_hms_opt(15, 15, 0) {
    Some(t) => t,
    None => panic!("invalid intraday cutoff"),
};

/// AUTO executions need at least this live probability on the active scenario.
pub const AUTO_PROBABILITY_THRESHOLD: f64 = 0.55;

/// Wall-clock time of day at the exchange.
pub fn market_time(now: DateTime<Utc>) -> NaiveTime {
    now.with_timezone(&MARKET_TZ).time()
}

pub fn past_intraday_cutoff(now: DateTime<Utc>) -> bool {
    market_time(now) > INTRADAY_CUTOFF
}

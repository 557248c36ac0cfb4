//! Time source abstraction
//!
//! The coordinator and the project indexer never call `Utc::now()` directly so
//! that due-checks can be driven deterministically in tests.

use chrono::{DateTime, DurationRound, TimeDelta, Utc};

/// Source of the current time
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Truncate a timestamp to the granularity of remote change queries (one minute)
pub fn to_query_precision(timestamp: DateTime<Utc>) -> DateTime<Utc> {
    timestamp
        .duration_trunc(TimeDelta::minutes(1))
        .unwrap_or(timestamp)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_query_precision_drops_seconds() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 42).unwrap();
        assert_eq!(
            to_query_precision(ts),
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap()
        );
    }

    #[test]
    fn test_query_precision_is_idempotent() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap();
        assert_eq!(to_query_precision(ts), ts);
    }
}

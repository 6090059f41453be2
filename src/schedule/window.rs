//! Query window calculation

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Bounds of one polling cycle's query, both in UTC at millisecond precision.
///
/// The trace service treats both bounds as inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeWindow {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
}

impl TimeWindow {
    /// Window ending at `now` and reaching back `lookback_minutes` plus
    /// `drift`.
    ///
    /// A drift that cannot be represented, or that would push `from` out of
    /// the calendar range, is dropped for this window so `from < to` always
    /// holds.
    pub fn calculate(now: DateTime<Utc>, lookback_minutes: u32, drift: Duration) -> Self {
        let to = truncate_millis(now);
        let lookback = chrono::Duration::minutes(i64::from(lookback_minutes.max(1)));

        let with_drift = chrono::Duration::from_std(drift)
            .ok()
            .and_then(|drift| lookback.checked_add(&drift))
            .and_then(|span| to.checked_sub_signed(span))
            .filter(|from| *from < to);

        let from = match with_drift {
            Some(from) => from,
            None => {
                tracing::warn!(
                    drift_ms = drift.as_millis() as u64,
                    "Drift correction out of range, ignoring it for this window"
                );
                to - lookback
            }
        };

        Self { from, to }
    }

    pub fn from_millis(&self) -> i64 {
        self.from.timestamp_millis()
    }

    pub fn to_millis(&self) -> i64 {
        self.to.timestamp_millis()
    }

    /// Length of the window
    pub fn span(&self) -> chrono::Duration {
        self.to - self.from
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.from.to_rfc3339(), self.to.to_rfc3339())
    }
}

fn truncate_millis(instant: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(instant.timestamp_millis()).unwrap_or(instant)
}

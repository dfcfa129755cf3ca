//! Fetch windows for event listing.

use chrono::{DateTime, Duration, Utc};

use crate::constants::{DEFAULT_LOOKAHEAD_DAYS, DEFAULT_LOOKBACK_DAYS};

/// Date range for filtering events.
/// A `None` end means the window is open towards the future.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DateRange {
    pub from: DateTime<Utc>,
    pub to: Option<DateTime<Utc>>,
}

impl Default for DateRange {
    fn default() -> Self {
        DateRange::around(Utc::now(), DEFAULT_LOOKBACK_DAYS, DEFAULT_LOOKAHEAD_DAYS)
    }
}

impl DateRange {
    /// `[now - lookback_days, now + lookahead_days]`
    pub fn around(now: DateTime<Utc>, lookback_days: i64, lookahead_days: i64) -> Self {
        DateRange {
            from: now - Duration::days(lookback_days),
            to: Some(now + Duration::days(lookahead_days)),
        }
    }

    /// Open-ended window starting at `from`.
    pub fn since(from: DateTime<Utc>) -> Self {
        DateRange { from, to: None }
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        instant >= self.from && self.to.is_none_or(|to| instant <= to)
    }

    /// `from` in CalDAV time-range format (`YYYYMMDDTHHMMSSZ`).
    pub fn caldav_from(&self) -> String {
        format_caldav_datetime(self.from)
    }

    /// `to` in CalDAV time-range format, using a far future date if unbounded.
    pub fn caldav_to(&self) -> String {
        let to = self
            .to
            .unwrap_or_else(|| self.from + Duration::days(365 * 10));
        format_caldav_datetime(to)
    }
}

/// Format an instant for CalDAV time-range queries (`20250101T000000Z`).
pub fn format_caldav_datetime(instant: DateTime<Utc>) -> String {
    instant.format("%Y%m%dT%H%M%SZ").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn open_window_contains_far_future() {
        let from = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let range = DateRange::since(from);
        assert!(range.contains(Utc.with_ymd_and_hms(2030, 6, 1, 0, 0, 0).unwrap()));
        assert!(!range.contains(Utc.with_ymd_and_hms(2024, 12, 31, 23, 0, 0).unwrap()));
    }

    #[test]
    fn caldav_format() {
        let now = Utc.with_ymd_and_hms(2025, 3, 20, 15, 4, 5).unwrap();
        let range = DateRange::around(now, 30, 0);
        assert_eq!(range.caldav_from(), "20250218T150405Z");
        assert_eq!(range.caldav_to(), "20250320T150405Z");
    }
}

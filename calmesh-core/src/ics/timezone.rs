//! TZID-qualified local times to UTC.

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use chrono_tz::Tz;

/// Convert a local wall-clock time in the zone named by `tzid` to a UTC instant.
///
/// The naive components are first read as a provisional UTC instant. The
/// zone's offset at that instant gives a first estimate. The offset is then
/// re-read at the estimate, which moves local times just past a DST jump onto
/// the right side of it. Times inside a spring-forward gap keep the pre-gap
/// offset, and ambiguous fall-back times resolve to their first occurrence.
///
/// Unknown zones fall back to treating the time as UTC.
pub fn zoned_to_utc(naive: NaiveDateTime, tzid: &str) -> DateTime<Utc> {
    let Some(tz) = lookup_zone(tzid) else {
        tracing::debug!(tzid, "unknown TZID, treating local time as UTC");
        return naive.and_utc();
    };

    let provisional = naive.and_utc();
    let estimate = provisional - offset_at(tz, provisional);
    let refined = provisional - offset_at(tz, estimate);

    if refined.with_timezone(&tz).naive_local() == naive {
        refined
    } else {
        estimate
    }
}

/// The zone's UTC offset at `instant`.
fn offset_at(tz: Tz, instant: DateTime<Utc>) -> TimeDelta {
    instant.with_timezone(&tz).naive_local() - instant.naive_utc()
}

/// Resolve a TZID. Some producers prefix IANA names with a vendor path
/// (`/mozilla.org/20050126_1/America/New_York`), so trailing segments are
/// tried as well.
fn lookup_zone(tzid: &str) -> Option<Tz> {
    let name = tzid.trim().trim_matches('"');
    if let Ok(tz) = name.parse::<Tz>() {
        return Some(tz);
    }

    let segments: Vec<&str> = name.split('/').filter(|s| !s.is_empty()).collect();
    (1..segments.len()).find_map(|skip| segments[skip..].join("/").parse::<Tz>().ok())
}

//! ICS parsing into a [`CalendarEvent`].

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};

use crate::constants::DEFAULT_EVENT_TITLE;
use crate::event::{CalendarEvent, EventTime};
use crate::ics::line::{ContentLine, unescape_text, unfold};
use crate::ics::timezone::zoned_to_utc;

/// Parse the first VEVENT of ICS content.
///
/// Returns `None` when there is no VEVENT, or it lacks a UID or DTSTART.
/// Such resources are not events this crate can sync, so callers drop them.
pub fn parse_event(content: &str) -> Option<CalendarEvent> {
    let mut in_event = false;
    let mut nested: Vec<String> = Vec::new();

    let mut uid = None;
    let mut summary = None;
    let mut description = None;
    let mut location = None;
    let mut rrule = None;
    let mut last_modified = None;
    let mut start = None;
    let mut end = None;
    let mut duration = None;
    let mut reminder_minutes = None;
    let mut cancelled = false;

    for raw in unfold(content) {
        let Some(line) = ContentLine::parse(&raw) else {
            continue;
        };
        let value = line.value.trim();

        match line.name.as_str() {
            "BEGIN" if !in_event => {
                in_event = value.eq_ignore_ascii_case("VEVENT");
                continue;
            }
            "BEGIN" => {
                nested.push(value.to_ascii_uppercase());
                continue;
            }
            "END" if in_event && nested.is_empty() && value.eq_ignore_ascii_case("VEVENT") => break,
            "END" if in_event => {
                nested.pop();
                continue;
            }
            _ if !in_event => continue,
            _ => {}
        }

        if let Some(component) = nested.last() {
            if component == "VALARM" && line.name == "TRIGGER" && reminder_minutes.is_none() {
                reminder_minutes = parse_trigger_minutes(&line);
            }
            continue;
        }

        match line.name.as_str() {
            "UID" if !value.is_empty() => uid = Some(value.to_string()),
            "SUMMARY" => summary = Some(unescape_text(value)),
            "DESCRIPTION" => description = Some(unescape_text(value)).filter(|d| !d.is_empty()),
            "LOCATION" => location = Some(unescape_text(value)).filter(|l| !l.is_empty()),
            "RRULE" => rrule = Some(value.to_string()),
            "LAST-MODIFIED" => last_modified = parse_utc(value),
            "DTSTART" => start = parse_event_time(&line),
            "DTEND" => end = parse_event_time(&line),
            "DURATION" => duration = parse_duration(value),
            "STATUS" => cancelled = value.eq_ignore_ascii_case("CANCELLED"),
            _ => {}
        }
    }

    let uid = uid?;
    let start = start?;
    let end = end
        .or_else(|| duration.and_then(|d| end_after(&start, d)))
        .unwrap_or_else(|| default_end(&start));

    Some(CalendarEvent {
        id: uid,
        title: summary
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_EVENT_TITLE.to_string()),
        description,
        location,
        start,
        end,
        recurrence: rrule,
        reminder_minutes,
        version: None,
        last_modified,
        cancelled,
        href: None,
    })
}

/// Decode DTSTART/DTEND.
///
/// - `VALUE=DATE` or 8 digits: all-day date
/// - trailing `Z`: UTC instant
/// - `TZID=`: local time in that zone, converted to UTC
/// - anything else (floating): read as UTC
fn parse_event_time(line: &ContentLine) -> Option<EventTime> {
    let value = line.value.trim();

    let is_date = line
        .param("VALUE")
        .is_some_and(|v| v.eq_ignore_ascii_case("DATE"))
        || (value.len() == 8 && value.bytes().all(|b| b.is_ascii_digit()));
    if is_date {
        return NaiveDate::parse_from_str(value.get(..8)?, "%Y%m%d")
            .ok()
            .map(EventTime::Date);
    }

    if let Some(utc) = parse_utc(value) {
        return Some(EventTime::DateTime(utc));
    }

    let naive = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S").ok()?;
    let instant = match line.param("TZID") {
        Some(tzid) => zoned_to_utc(naive, tzid),
        None => naive.and_utc(),
    };
    Some(EventTime::DateTime(instant))
}

/// `YYYYMMDDTHHMMSSZ`
fn parse_utc(value: &str) -> Option<DateTime<Utc>> {
    let naive = value
        .strip_suffix('Z')
        .or_else(|| value.strip_suffix('z'))?;
    NaiveDateTime::parse_from_str(naive, "%Y%m%dT%H%M%S")
        .ok()
        .map(|dt| dt.and_utc())
}

/// End from DTSTART plus DURATION, `None` when it falls outside the calendar.
fn end_after(start: &EventTime, duration: Duration) -> Option<EventTime> {
    match start {
        EventTime::DateTime(dt) => dt.checked_add_signed(duration).map(EventTime::DateTime),
        EventTime::Date(d) => {
            let days = Duration::try_days(duration.num_days().max(1))?;
            d.checked_add_signed(days).map(EventTime::Date)
        }
    }
}

/// End when neither DTEND nor a usable DURATION is present.
fn default_end(start: &EventTime) -> EventTime {
    match start {
        EventTime::DateTime(dt) => EventTime::DateTime(*dt),
        EventTime::Date(d) => EventTime::Date(d.succ_opt().unwrap_or(*d)),
    }
}

/// Minutes before start for a relative TRIGGER (`-PT15M`, `-P1D`, `-PT1H30M`).
///
/// Absolute triggers (`VALUE=DATE-TIME`) and triggers after the start
/// cannot be expressed as a reminder offset and are ignored.
fn parse_trigger_minutes(line: &ContentLine) -> Option<i64> {
    if line
        .param("VALUE")
        .is_some_and(|v| v.eq_ignore_ascii_case("DATE-TIME"))
    {
        return None;
    }
    if line
        .param("RELATED")
        .is_some_and(|v| v.eq_ignore_ascii_case("END"))
    {
        return None;
    }

    let offset = parse_duration(line.value.trim())?;
    if offset > Duration::zero() {
        return None;
    }
    Some(-offset.num_minutes())
}

/// Parse an RFC 5545 duration (`[+-]P[nW][nD][T[nH][nM][nS]]`) into a signed duration.
fn parse_duration(value: &str) -> Option<Duration> {
    let (negative, rest) = match value.as_bytes().first()? {
        b'-' => (true, &value[1..]),
        b'+' => (false, &value[1..]),
        _ => (false, value),
    };
    let rest = rest.strip_prefix(['P', 'p'])?;

    let mut total = Duration::zero();
    let mut number = String::new();
    let mut in_time = false;
    let mut saw_component = false;

    for c in rest.chars() {
        match c.to_ascii_uppercase() {
            '0'..='9' => number.push(c),
            'T' => in_time = true,
            unit => {
                let n: i64 = number.parse().ok()?;
                number.clear();
                saw_component = true;
                let component = match (unit, in_time) {
                    ('W', false) => Duration::try_weeks(n),
                    ('D', false) => Duration::try_days(n),
                    ('H', true) => Duration::try_hours(n),
                    ('M', true) => Duration::try_minutes(n),
                    ('S', true) => Duration::try_seconds(n),
                    _ => None,
                }?;
                total = total.checked_add(&component)?;
            }
        }
    }

    if !saw_component || !number.is_empty() {
        return None;
    }
    Some(if negative { -total } else { total })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ics::generate_ics;
    use chrono::TimeZone;

    const TEAM_SYNC: &str = "BEGIN:VCALENDAR\r\n\
VERSION:2.0\r\n\
PRODID:-//Apple Inc.//macOS 14.0//EN\r\n\
BEGIN:VTIMEZONE\r\n\
TZID:America/New_York\r\n\
BEGIN:STANDARD\r\n\
DTSTART:20071104T020000\r\n\
TZOFFSETFROM:-0400\r\n\
TZOFFSETTO:-0500\r\n\
END:STANDARD\r\n\
END:VTIMEZONE\r\n\
BEGIN:VEVENT\r\n\
UID:2B1E0F3A-team-sync\r\n\
DTSTAMP:20240301T120000Z\r\n\
LAST-MODIFIED:20240301T120000Z\r\n\
DTSTART;TZID=America/New_York:20240311T093000\r\n\
DTEND;TZID=America/New_York:20240311T100000\r\n\
SUMMARY:Team Sync\r\n\
DESCRIPTION:Weekly sync\\, bring updates\\nSecond line\r\n\
LOCATION:Room 4\r\n\
RRULE:FREQ=WEEKLY;BYDAY=MO\r\n\
BEGIN:VALARM\r\n\
ACTION:DISPLAY\r\n\
DESCRIPTION:Reminder\r\n\
TRIGGER:-PT15M\r\n\
END:VALARM\r\n\
END:VEVENT\r\n\
END:VCALENDAR\r\n";

    #[test]
    fn parses_full_event() {
        let event = parse_event(TEAM_SYNC).expect("Should parse");

        assert_eq!(event.id, "2B1E0F3A-team-sync");
        assert_eq!(event.title, "Team Sync");
        assert_eq!(event.description.as_deref(), Some("Weekly sync, bring updates\nSecond line"));
        assert_eq!(event.location.as_deref(), Some("Room 4"));
        assert_eq!(event.recurrence.as_deref(), Some("FREQ=WEEKLY;BYDAY=MO"));
        assert_eq!(event.reminder_minutes, Some(15));
        assert_eq!(
            event.last_modified,
            Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap())
        );
        // EDT (UTC-4) is in effect on March 11
        assert_eq!(
            event.start,
            EventTime::DateTime(Utc.with_ymd_and_hms(2024, 3, 11, 13, 30, 0).unwrap())
        );
        assert!(!event.cancelled);
    }

    #[test]
    fn vtimezone_properties_do_not_leak_into_event() {
        // The VTIMEZONE block has its own DTSTART; only the VEVENT's counts
        let event = parse_event(TEAM_SYNC).unwrap();
        assert_ne!(
            event.start,
            EventTime::DateTime(Utc.with_ymd_and_hms(2007, 11, 4, 2, 0, 0).unwrap())
        );
    }

    #[test]
    fn missing_uid_is_discarded() {
        let ics = "BEGIN:VCALENDAR\nBEGIN:VEVENT\nSUMMARY:No id\nDTSTART:20240101T100000Z\nEND:VEVENT\nEND:VCALENDAR";
        assert!(parse_event(ics).is_none());
    }

    #[test]
    fn non_event_resources_are_discarded() {
        let ics = "BEGIN:VCALENDAR\nBEGIN:VTODO\nUID:todo-1\nSUMMARY:Buy milk\nEND:VTODO\nEND:VCALENDAR";
        assert!(parse_event(ics).is_none());
    }

    #[test]
    fn all_day_and_cancelled() {
        let ics = "BEGIN:VCALENDAR\nBEGIN:VEVENT\nUID:holiday\nSUMMARY:Holiday\n\
DTSTART;VALUE=DATE:20241225\nSTATUS:CANCELLED\nEND:VEVENT\nEND:VCALENDAR";
        let event = parse_event(ics).unwrap();

        assert!(event.is_all_day());
        assert!(event.cancelled);
        assert_eq!(event.start, EventTime::Date(NaiveDate::from_ymd_opt(2024, 12, 25).unwrap()));
        // No DTEND: all-day events last one day
        assert_eq!(event.end, EventTime::Date(NaiveDate::from_ymd_opt(2024, 12, 26).unwrap()));
    }

    #[test]
    fn duration_replaces_missing_dtend() {
        let ics = "BEGIN:VCALENDAR\nBEGIN:VEVENT\nUID:d\nDTSTART:20240101T100000Z\nDURATION:PT1H30M\nEND:VEVENT\nEND:VCALENDAR";
        let event = parse_event(ics).unwrap();
        assert_eq!(
            event.end,
            EventTime::DateTime(Utc.with_ymd_and_hms(2024, 1, 1, 11, 30, 0).unwrap())
        );
    }

    #[test]
    fn out_of_range_duration_falls_back_to_default_end() {
        let timed = "BEGIN:VCALENDAR\nBEGIN:VEVENT\nUID:d\nDTSTART:20240101T100000Z\nDURATION:P9999999999999W\nEND:VEVENT\nEND:VCALENDAR";
        let event = parse_event(timed).unwrap();
        assert_eq!(event.end, event.start);

        // Representable as a duration but past the last representable date
        let all_day = "BEGIN:VCALENDAR\nBEGIN:VEVENT\nUID:e\nDTSTART;VALUE=DATE:20240101\nDURATION:P99999999D\nEND:VEVENT\nEND:VCALENDAR";
        let event = parse_event(all_day).unwrap();
        assert_eq!(event.end, EventTime::Date(NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()));
    }

    #[test]
    fn oversized_durations_are_rejected() {
        assert_eq!(parse_duration("P9999999999999W"), None);
        assert_eq!(parse_duration("PT99999999999999999S"), None);
        assert_eq!(parse_duration("P15000000000W15000000000W"), None);
        assert_eq!(parse_duration("P1W2D"), Duration::try_days(9));
    }

    #[test]
    fn spring_forward_start_times() {
        let before = "BEGIN:VCALENDAR\nBEGIN:VEVENT\nUID:a\nDTSTART;TZID=America/New_York:20240310T013000\nEND:VEVENT\nEND:VCALENDAR";
        let gap = "BEGIN:VCALENDAR\nBEGIN:VEVENT\nUID:b\nDTSTART;TZID=America/New_York:20240310T020000\nEND:VEVENT\nEND:VCALENDAR";
        let after = "BEGIN:VCALENDAR\nBEGIN:VEVENT\nUID:c\nDTSTART;TZID=America/New_York:20240310T040000\nEND:VEVENT\nEND:VCALENDAR";

        let before = parse_event(before).unwrap().start.to_utc();
        let gap = parse_event(gap).unwrap().start.to_utc();
        let after = parse_event(after).unwrap().start.to_utc();

        assert_eq!(before, Utc.with_ymd_and_hms(2024, 3, 10, 6, 30, 0).unwrap());
        assert_eq!(gap, Utc.with_ymd_and_hms(2024, 3, 10, 7, 0, 0).unwrap());
        assert_eq!(after, Utc.with_ymd_and_hms(2024, 3, 10, 8, 0, 0).unwrap());
    }

    #[test]
    fn trigger_forms() {
        let trigger = |raw: &str| parse_trigger_minutes(&ContentLine::parse(raw).unwrap());

        assert_eq!(trigger("TRIGGER:-PT30M"), Some(30));
        assert_eq!(trigger("TRIGGER;RELATED=START:-PT1H30M"), Some(90));
        assert_eq!(trigger("TRIGGER:-P1D"), Some(1440));
        assert_eq!(trigger("TRIGGER:-PT900S"), Some(15));
        assert_eq!(trigger("TRIGGER:PT0S"), Some(0));
        assert_eq!(trigger("TRIGGER:PT10M"), None);
        assert_eq!(trigger("TRIGGER;VALUE=DATE-TIME:20240101T090000Z"), None);
        assert_eq!(trigger("TRIGGER:-P9999999999999W"), None);
    }

    #[test]
    fn line_folding_preserves_whitespace() {
        let ics = "BEGIN:VCALENDAR\r\nBEGIN:VEVENT\r\nUID:test-123\r\nDTSTART:20240101T100000Z\r\n\
DESCRIPTION:Hello \r\n world and \r\n more text\r\nEND:VEVENT\r\nEND:VCALENDAR";

        let event = parse_event(ics).expect("Should parse");
        assert_eq!(event.description.as_deref(), Some("Hello world and more text"));
    }

    #[test]
    fn roundtrip_preserves_identity_times_summary_and_rrule() {
        let parsed = parse_event(TEAM_SYNC).unwrap();
        let reparsed = parse_event(&generate_ics(&parsed)).expect("Should reparse");

        assert_eq!(reparsed.id, parsed.id);
        assert_eq!(reparsed.title, parsed.title);
        assert_eq!(reparsed.start.to_utc(), parsed.start.to_utc());
        assert_eq!(reparsed.end.to_utc(), parsed.end.to_utc());
        assert_eq!(reparsed.recurrence, parsed.recurrence);
        assert_eq!(reparsed.reminder_minutes, parsed.reminder_minutes);
        assert_eq!(reparsed.description, parsed.description);
    }
}

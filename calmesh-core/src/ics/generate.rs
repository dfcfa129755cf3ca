//! ICS generation from a [`CalendarEvent`].

use chrono::Utc;

use crate::constants::PRODID;
use crate::date_range::format_caldav_datetime;
use crate::event::{CalendarEvent, EventTime};
use crate::ics::line::{escape_text, fold};

/// Serialize an event into a complete VCALENDAR with a single VEVENT.
///
/// Times are written in UTC (or as `VALUE=DATE` for all-day events), so no
/// VTIMEZONE is needed. Output uses CRLF line endings and 75-octet folding.
pub fn generate_ics(event: &CalendarEvent) -> String {
    let mut lines = vec![
        "BEGIN:VCALENDAR".to_string(),
        "VERSION:2.0".to_string(),
        format!("PRODID:{PRODID}"),
        "CALSCALE:GREGORIAN".to_string(),
        "BEGIN:VEVENT".to_string(),
        format!("UID:{}", event.id),
        format!("DTSTAMP:{}", format_caldav_datetime(Utc::now())),
        time_line("DTSTART", &event.start),
        time_line("DTEND", &event.end),
        format!("SUMMARY:{}", escape_text(&event.title)),
    ];

    if let Some(ref description) = event.description {
        lines.push(format!("DESCRIPTION:{}", escape_text(description)));
    }
    if let Some(ref location) = event.location {
        lines.push(format!("LOCATION:{}", escape_text(location)));
    }
    if let Some(ref rrule) = event.recurrence {
        let rule = rrule.trim();
        let rule = rule.strip_prefix("RRULE:").unwrap_or(rule);
        if !rule.is_empty() {
            lines.push(format!("RRULE:{rule}"));
        }
    }
    if let Some(modified) = event.last_modified {
        lines.push(format!("LAST-MODIFIED:{}", format_caldav_datetime(modified)));
    }
    if event.cancelled {
        lines.push("STATUS:CANCELLED".to_string());
    }
    if let Some(minutes) = event.reminder_minutes {
        lines.push("BEGIN:VALARM".to_string());
        lines.push("ACTION:DISPLAY".to_string());
        lines.push("DESCRIPTION:Reminder".to_string());
        lines.push(format!("TRIGGER:-PT{}M", minutes.max(0)));
        lines.push("END:VALARM".to_string());
    }

    lines.push("END:VEVENT".to_string());
    lines.push("END:VCALENDAR".to_string());

    let mut out = String::new();
    for line in &lines {
        out.push_str(&fold(line));
        out.push_str("\r\n");
    }
    out
}

fn time_line(name: &str, time: &EventTime) -> String {
    match time {
        EventTime::Date(date) => format!("{name};VALUE=DATE:{}", date.format("%Y%m%d")),
        EventTime::DateTime(dt) => format!("{name}:{}", format_caldav_datetime(*dt)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ics::parse_event;
    use chrono::{NaiveDate, TimeZone};

    fn lunch() -> CalendarEvent {
        CalendarEvent::new(
            "lunch-1",
            "Lunch",
            EventTime::DateTime(Utc.with_ymd_and_hms(2025, 3, 20, 12, 0, 0).unwrap()),
            EventTime::DateTime(Utc.with_ymd_and_hms(2025, 3, 20, 13, 0, 0).unwrap()),
        )
    }

    #[test]
    fn writes_required_structure() {
        let ics = generate_ics(&lunch());

        assert!(ics.starts_with("BEGIN:VCALENDAR\r\nVERSION:2.0\r\n"));
        assert!(ics.contains(&format!("PRODID:{PRODID}\r\n")));
        assert!(ics.contains("UID:lunch-1\r\n"));
        assert!(ics.contains("DTSTAMP:"));
        assert!(ics.contains("DTSTART:20250320T120000Z\r\n"));
        assert!(ics.contains("DTEND:20250320T130000Z\r\n"));
        assert!(ics.contains("SUMMARY:Lunch\r\n"));
        assert!(ics.ends_with("END:VEVENT\r\nEND:VCALENDAR\r\n"));
        assert!(!ics.contains("VALARM"));
        assert!(!ics.contains("STATUS"));
    }

    #[test]
    fn all_day_uses_date_values() {
        let event = CalendarEvent::new(
            "holiday",
            "Holiday",
            EventTime::Date(NaiveDate::from_ymd_opt(2025, 12, 25).unwrap()),
            EventTime::Date(NaiveDate::from_ymd_opt(2025, 12, 26).unwrap()),
        );
        let ics = generate_ics(&event);

        assert!(ics.contains("DTSTART;VALUE=DATE:20251225\r\n"));
        assert!(ics.contains("DTEND;VALUE=DATE:20251226\r\n"));
    }

    #[test]
    fn reminder_cancellation_and_rrule() {
        let event = CalendarEvent {
            recurrence: Some("RRULE:FREQ=DAILY;COUNT=5".to_string()),
            reminder_minutes: Some(10),
            cancelled: true,
            ..lunch()
        };
        let ics = generate_ics(&event);

        assert!(ics.contains("RRULE:FREQ=DAILY;COUNT=5\r\n"));
        assert!(!ics.contains("RRULE:RRULE:"));
        assert!(ics.contains("STATUS:CANCELLED\r\n"));
        assert!(ics.contains(
            "BEGIN:VALARM\r\nACTION:DISPLAY\r\nDESCRIPTION:Reminder\r\nTRIGGER:-PT10M\r\nEND:VALARM\r\n"
        ));
    }

    #[test]
    fn escapes_and_folds_long_text() {
        let event = CalendarEvent {
            title: "Planning, Q3; budget".to_string(),
            description: Some("x".repeat(200)),
            ..lunch()
        };
        let ics = generate_ics(&event);

        assert!(ics.contains("SUMMARY:Planning\\, Q3\\; budget\r\n"));
        assert!(ics.split("\r\n").all(|line| line.len() <= 75));

        let parsed = parse_event(&ics).unwrap();
        assert_eq!(parsed.title, "Planning, Q3; budget");
        assert_eq!(parsed.description, Some("x".repeat(200)));
    }

    #[test]
    fn roundtrip_all_day_with_reminder() {
        let event = CalendarEvent {
            reminder_minutes: Some(1440),
            location: Some("Home".to_string()),
            ..CalendarEvent::new(
                "bday",
                "Birthday",
                EventTime::Date(NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()),
                EventTime::Date(NaiveDate::from_ymd_opt(2025, 6, 2).unwrap()),
            )
        };
        let parsed = parse_event(&generate_ics(&event)).unwrap();

        assert_eq!(parsed.id, event.id);
        assert_eq!(parsed.start, event.start);
        assert_eq!(parsed.end, event.end);
        assert_eq!(parsed.reminder_minutes, Some(1440));
        assert_eq!(parsed.location.as_deref(), Some("Home"));
    }
}

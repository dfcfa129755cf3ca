//! Google event JSON <-> `CalendarEvent`.

use calmesh_core::constants::DEFAULT_EVENT_TITLE;
use calmesh_core::{CalendarEvent, EventTime};
use chrono::DateTime;

use crate::types::{GoogleEvent, GoogleEventTime, GoogleReminder, GoogleReminders};

const CANCELLED: &str = "cancelled";
const RRULE_PREFIX: &str = "RRULE:";

pub trait FromGoogle {
    fn from_google(event: GoogleEvent) -> Option<Self>
    where
        Self: Sized;
}

pub trait ToGoogle {
    fn to_google(&self) -> GoogleEvent;
}

impl FromGoogle for CalendarEvent {
    /// `None` for entries without an id, or live entries without times.
    fn from_google(event: GoogleEvent) -> Option<Self> {
        let id = event.id.filter(|id| !id.is_empty())?;
        let cancelled = event.status.as_deref() == Some(CANCELLED);

        // Deleted entries listed with showDeleted often carry no times
        let (start, end) = match (event.start.as_ref().and_then(event_time), event.end.as_ref().and_then(event_time)) {
            (Some(start), Some(end)) => (start, end),
            (Some(start), None) => (start.clone(), start),
            _ if cancelled => {
                let epoch = EventTime::DateTime(DateTime::UNIX_EPOCH);
                (epoch.clone(), epoch)
            }
            _ => return None,
        };

        let recurrence = event
            .recurrence
            .iter()
            .find_map(|line| line.strip_prefix(RRULE_PREFIX))
            .map(str::to_string);

        let reminder_minutes = event
            .reminders
            .filter(|r| !r.use_default)
            .and_then(|r| r.overrides.iter().map(|o| o.minutes).min());

        Some(CalendarEvent {
            id,
            title: event
                .summary
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_EVENT_TITLE.to_string()),
            description: event.description.filter(|s| !s.is_empty()),
            location: event.location.filter(|s| !s.is_empty()),
            start,
            end,
            recurrence,
            reminder_minutes,
            version: event.etag,
            last_modified: event.updated,
            cancelled,
            href: None,
        })
    }
}

impl ToGoogle for CalendarEvent {
    fn to_google(&self) -> GoogleEvent {
        let recurrence = self
            .recurrence
            .iter()
            .map(|rule| format!("{RRULE_PREFIX}{}", rule.trim_start_matches(RRULE_PREFIX)))
            .collect();

        let reminders = self.reminder_minutes.map(|minutes| GoogleReminders {
            use_default: false,
            overrides: vec![GoogleReminder {
                method: "popup".to_string(),
                minutes,
            }],
        });

        GoogleEvent {
            id: None,
            status: Some(if self.cancelled { CANCELLED } else { "confirmed" }.to_string()),
            summary: Some(self.title.clone()),
            description: self.description.clone(),
            location: self.location.clone(),
            start: Some(to_google_time(&self.start)),
            end: Some(to_google_time(&self.end)),
            recurrence,
            reminders,
            etag: None,
            updated: None,
        }
    }
}

fn event_time(time: &GoogleEventTime) -> Option<EventTime> {
    time.date_time
        .map(EventTime::DateTime)
        .or_else(|| time.date.map(EventTime::Date))
}

fn to_google_time(time: &EventTime) -> GoogleEventTime {
    match time {
        EventTime::DateTime(dt) => GoogleEventTime {
            date_time: Some(*dt),
            time_zone: Some("UTC".to_string()),
            ..Default::default()
        },
        EventTime::Date(d) => GoogleEventTime {
            date: Some(*d),
            ..Default::default()
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn google_event(json: serde_json::Value) -> GoogleEvent {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn converts_timed_event() {
        let event = CalendarEvent::from_google(google_event(serde_json::json!({
            "id": "g1",
            "etag": "\"77\"",
            "status": "confirmed",
            "summary": "Team Sync",
            "location": "",
            "start": {"dateTime": "2024-03-11T09:30:00-04:00"},
            "end": {"dateTime": "2024-03-11T10:00:00-04:00"},
            "recurrence": ["EXDATE:20240318T133000Z", "RRULE:FREQ=WEEKLY;BYDAY=MO"],
            "reminders": {"useDefault": false, "overrides": [{"method": "popup", "minutes": 10}, {"method": "email", "minutes": 60}]},
            "updated": "2024-03-01T12:00:00Z"
        })))
        .unwrap();

        assert_eq!(event.id, "g1");
        assert_eq!(event.location, None);
        assert_eq!(
            event.start,
            EventTime::DateTime(Utc.with_ymd_and_hms(2024, 3, 11, 13, 30, 0).unwrap())
        );
        assert_eq!(event.recurrence.as_deref(), Some("FREQ=WEEKLY;BYDAY=MO"));
        assert_eq!(event.reminder_minutes, Some(10));
        assert_eq!(event.version.as_deref(), Some("\"77\""));
        assert_eq!(event.last_modified, Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()));
        assert!(!event.cancelled);
    }

    #[test]
    fn cancelled_tombstone_without_times() {
        let event = CalendarEvent::from_google(google_event(serde_json::json!({
            "id": "g2",
            "status": "cancelled"
        })))
        .unwrap();

        assert!(event.cancelled);
        assert_eq!(event.title, DEFAULT_EVENT_TITLE);
    }

    #[test]
    fn live_event_without_times_is_dropped() {
        assert!(CalendarEvent::from_google(google_event(serde_json::json!({"id": "g3", "status": "confirmed"}))).is_none());
        assert!(CalendarEvent::from_google(google_event(serde_json::json!({"status": "confirmed"}))).is_none());
    }

    #[test]
    fn default_reminders_are_not_copied() {
        let event = CalendarEvent::from_google(google_event(serde_json::json!({
            "id": "g4",
            "start": {"date": "2024-03-10"},
            "end": {"date": "2024-03-11"},
            "reminders": {"useDefault": true}
        })))
        .unwrap();

        assert!(event.is_all_day());
        assert_eq!(event.reminder_minutes, None);
    }

    #[test]
    fn outgoing_shape() {
        let mut event = CalendarEvent::new(
            "caldav-uid",
            "Holiday",
            EventTime::Date(NaiveDate::from_ymd_opt(2024, 12, 25).unwrap()),
            EventTime::Date(NaiveDate::from_ymd_opt(2024, 12, 26).unwrap()),
        );
        event.recurrence = Some("FREQ=YEARLY".into());
        event.reminder_minutes = Some(30);

        let json = serde_json::to_value(event.to_google()).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "status": "confirmed",
                "summary": "Holiday",
                "start": {"date": "2024-12-25"},
                "end": {"date": "2024-12-26"},
                "recurrence": ["RRULE:FREQ=YEARLY"],
                "reminders": {"useDefault": false, "overrides": [{"method": "popup", "minutes": 30}]}
            })
        );
    }
}

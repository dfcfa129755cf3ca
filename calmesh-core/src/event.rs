//! Provider-neutral event types.
//!
//! Both calendar clients convert their wire payloads into [`CalendarEvent`]
//! immediately after each call. The reconciler only ever sees this type.

use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// A calendar event (provider-neutral)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarEvent {
    /// Provider id: the ICS UID on CalDAV, the event id on the REST side.
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: EventTime,
    pub end: EventTime,
    /// RRULE value, kept verbatim (without the `RRULE:` prefix)
    pub recurrence: Option<String>,
    /// Reminder offset in minutes before start
    pub reminder_minutes: Option<i64>,

    // Sync Infrastructure
    /// Version marker (ETag-equivalent)
    pub version: Option<String>,
    /// Last modification timestamp (LAST-MODIFIED / `updated`)
    pub last_modified: Option<DateTime<Utc>>,
    pub cancelled: bool,
    /// Resource locator; CalDAV servers may relocate resources away from `{calendar}{uid}.ics`
    pub href: Option<String>,
}

impl CalendarEvent {
    /// A confirmed timed event with only the required fields set.
    pub fn new(id: impl Into<String>, title: impl Into<String>, start: EventTime, end: EventTime) -> Self {
        CalendarEvent {
            id: id.into(),
            title: title.into(),
            description: None,
            location: None,
            start,
            end,
            recurrence: None,
            reminder_minutes: None,
            version: None,
            last_modified: None,
            cancelled: false,
            href: None,
        }
    }

    pub fn is_all_day(&self) -> bool {
        matches!(self.start, EventTime::Date(_))
    }

    /// Same title and same normalized start instant.
    pub fn is_soft_duplicate_of(&self, other: &CalendarEvent) -> bool {
        self.title == other.title && self.start.to_utc() == other.start.to_utc()
    }

    /// Copy of this event's content, carrying the identity of the counterpart it will overwrite.
    pub fn with_identity(&self, id: &str, href: Option<&str>) -> CalendarEvent {
        CalendarEvent {
            id: id.to_string(),
            href: href.map(str::to_string),
            version: None,
            last_modified: None,
            ..self.clone()
        }
    }
}

impl fmt::Display for CalendarEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.title, self.start)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventTime {
    DateTime(DateTime<Utc>),
    /// All-day (no time component)
    Date(NaiveDate),
}

impl EventTime {
    /// Normalized instant. All-day dates map to midnight UTC.
    pub fn to_utc(&self) -> DateTime<Utc> {
        match self {
            EventTime::DateTime(dt) => *dt,
            EventTime::Date(d) => d.and_time(chrono::NaiveTime::MIN).and_utc(),
        }
    }
}

impl fmt::Display for EventTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventTime::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M UTC")),
            EventTime::Date(d) => write!(f, "{}", d.format("%Y-%m-%d")),
        }
    }
}

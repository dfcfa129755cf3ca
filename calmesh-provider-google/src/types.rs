//! Google Calendar v3 JSON shapes and OAuth types.
//!
//! Only the fields calmesh reads or writes are modelled; unknown fields are
//! ignored on input and omitted on output.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_API_BASE: &str = "https://www.googleapis.com/calendar/v3";
pub const DEFAULT_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

// =============================================================================
// Config Types
// =============================================================================

/// OAuth client configuration and endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GoogleConfig {
    pub client_id: String,
    pub client_secret: String,
    pub token_url: String,
    pub api_base: String,
}

impl Default for GoogleConfig {
    fn default() -> Self {
        GoogleConfig {
            client_id: String::new(),
            client_secret: String::new(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            api_base: DEFAULT_API_BASE.to_string(),
        }
    }
}

/// Tokens for a single authenticated account
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct GoogleTokens {
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl std::fmt::Debug for GoogleTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GoogleTokens")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Body of a `grant_type=refresh_token` response
#[derive(Debug, Deserialize)]
pub(crate) struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

// =============================================================================
// Calendar Types
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleCalendar {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub id: String,
    #[serde(default)]
    pub summary: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CalendarListPage {
    #[serde(default)]
    pub items: Vec<GoogleCalendar>,
    pub next_page_token: Option<String>,
}

// =============================================================================
// Event Types
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<GoogleEventTime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<GoogleEventTime>,
    /// `RRULE:`, `EXDATE:` ... lines
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recurrence: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reminders: Option<GoogleReminders>,
    #[serde(default, skip_serializing)]
    pub etag: Option<String>,
    #[serde(default, skip_serializing)]
    pub updated: Option<DateTime<Utc>>,
}

/// Either `dateTime` (timed) or `date` (all-day) is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleEventTime {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_zone: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleReminders {
    #[serde(default)]
    pub use_default: bool,
    #[serde(default)]
    pub overrides: Vec<GoogleReminder>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GoogleReminder {
    pub method: String,
    pub minutes: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct EventListPage {
    #[serde(default)]
    pub items: Vec<GoogleEvent>,
    pub next_page_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn offsets_normalize_to_utc() {
        let json = r#"{
            "id": "abc",
            "etag": "\"3390\"",
            "status": "confirmed",
            "summary": "Team Sync",
            "start": {"dateTime": "2024-03-11T09:30:00-04:00", "timeZone": "America/New_York"},
            "end": {"dateTime": "2024-03-11T10:00:00-04:00"},
            "updated": "2024-03-01T12:00:00.000Z",
            "attendees": [{"email": "bob@example.com"}]
        }"#;
        let event: GoogleEvent = serde_json::from_str(json).unwrap();

        assert_eq!(
            event.start.unwrap().date_time,
            Some(Utc.with_ymd_and_hms(2024, 3, 11, 13, 30, 0).unwrap())
        );
        assert_eq!(event.etag.as_deref(), Some("\"3390\""));
    }

    #[test]
    fn server_fields_are_not_sent() {
        let event = GoogleEvent {
            summary: Some("Lunch".into()),
            etag: Some("\"1\"".into()),
            updated: Some(Utc::now()),
            ..Default::default()
        };
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json, serde_json::json!({"summary": "Lunch"}));
    }
}

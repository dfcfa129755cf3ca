//! Persisted records: accounts, calendar and event mappings, sync log.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type UserId = String;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Provider {
    CalDav,
    Google,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::CalDav => write!(f, "caldav"),
            Provider::Google => write!(f, "google"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Credentials {
    OAuth {
        access_token: String,
        refresh_token: String,
        expires_at: Option<DateTime<Utc>>,
    },
    Basic {
        username: String,
        password: String,
        server_url: String,
    },
}

/// A user's connection to one provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub user_id: UserId,
    pub provider: Provider,
    pub credentials: Credentials,
    pub updated_at: DateTime<Utc>,
}

impl Account {
    pub fn new(user_id: impl Into<String>, provider: Provider, credentials: Credentials) -> Self {
        Account {
            user_id: user_id.into(),
            provider,
            credentials,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncDirection {
    #[default]
    Bidirectional,
    SourceToTarget,
    TargetToSource,
}

impl SyncDirection {
    pub fn source_to_target(self) -> bool {
        matches!(self, SyncDirection::Bidirectional | SyncDirection::SourceToTarget)
    }

    pub fn target_to_source(self) -> bool {
        matches!(self, SyncDirection::Bidirectional | SyncDirection::TargetToSource)
    }
}

impl fmt::Display for SyncDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncDirection::Bidirectional => write!(f, "bidirectional"),
            SyncDirection::SourceToTarget => write!(f, "source-to-target"),
            SyncDirection::TargetToSource => write!(f, "target-to-source"),
        }
    }
}

impl std::str::FromStr for SyncDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bidirectional" | "both" => Ok(SyncDirection::Bidirectional),
            "source-to-target" | "google-to-caldav" => Ok(SyncDirection::SourceToTarget),
            "target-to-source" | "caldav-to-google" => Ok(SyncDirection::TargetToSource),
            other => Err(format!("unknown direction '{other}'")),
        }
    }
}

/// A user's pairing of one source (REST) calendar with one target (CalDAV) calendar.
///
/// Either id may be unset; it is resolved or provisioned by display name on
/// the next run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarMapping {
    pub id: String,
    pub user_id: UserId,
    pub source_calendar_id: Option<String>,
    pub target_calendar_id: Option<String>,
    #[serde(default)]
    pub direction: SyncDirection,
    pub enabled: bool,
    pub display_name: String,
}

impl CalendarMapping {
    pub fn new(user_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        CalendarMapping {
            id: uuid::Uuid::new_v4().to_string(),
            user_id: user_id.into(),
            source_calendar_id: None,
            target_calendar_id: None,
            direction: SyncDirection::default(),
            enabled: true,
            display_name: display_name.into(),
        }
    }
}

/// The link between a source event and its target counterpart.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMapping {
    pub user_id: UserId,
    pub calendar_mapping_id: String,
    pub source_event_id: String,
    pub target_event_id: String,
    pub source_version: Option<String>,
    pub target_version: Option<String>,
    pub source_href: Option<String>,
    pub target_href: Option<String>,
    pub last_synced_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Success,
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Success => "SUCCESS",
        };
        f.pad(s)
    }
}

/// What started a sync job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncTrigger {
    Auto,
    Manual,
}

impl fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncTrigger::Auto => f.write_str("AUTO"),
            SyncTrigger::Manual => f.write_str("MANUAL"),
        }
    }
}

/// A user-facing sync log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    pub user_id: UserId,
    pub level: LogLevel,
    pub message: String,
    pub details: Option<serde_json::Value>,
    pub source: SyncTrigger,
    pub created_at: DateTime<Utc>,
}

impl SyncLogEntry {
    pub fn new(user_id: &str, level: LogLevel, message: impl Into<String>, source: SyncTrigger) -> Self {
        SyncLogEntry {
            user_id: user_id.to_string(),
            level,
            message: message.into(),
            details: None,
            source,
            created_at: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

impl fmt::Display for SyncLogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} [{}] {:<7} {}",
            self.created_at.format("%Y-%m-%d %H:%M:%S"),
            self.source,
            self.level,
            self.message
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub auto_sync: bool,
}

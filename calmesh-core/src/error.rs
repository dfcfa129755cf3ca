//! Error types for the calmesh ecosystem.

use thiserror::Error;

/// Errors that can occur in calmesh operations.
#[derive(Error, Debug)]
pub enum CalMeshError {
    /// The server answered with a non-success status. The status is kept so
    /// callers can tell "removed upstream" (404/410) from other failures.
    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("ICS parse error: {0}")]
    IcsParse(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Event {event_id} is already linked to another event")]
    MappingConflict { event_id: String },

    #[error("Calendar not found: {0}")]
    CalendarNotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A job handler panicked or was cancelled before returning.
    #[error("Job aborted: {0}")]
    JobAborted(String),

    /// Another process holds this user's sync lock.
    #[error("A sync is already running for {0}")]
    SyncInProgress(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CalMeshError {
    pub fn http(status: u16, message: impl Into<String>) -> Self {
        CalMeshError::Http {
            status,
            message: message.into(),
        }
    }

    /// HTTP status carried by this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            CalMeshError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// True for 404 Not Found and 410 Gone.
    pub fn is_gone(&self) -> bool {
        matches!(self.status(), Some(404 | 410))
    }
}

impl From<serde_json::Error> for CalMeshError {
    fn from(e: serde_json::Error) -> Self {
        CalMeshError::Serialization(e.to_string())
    }
}

/// Result type alias for calmesh operations.
pub type CalMeshResult<T> = Result<T, CalMeshError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gone_statuses() {
        assert!(CalMeshError::http(404, "missing").is_gone());
        assert!(CalMeshError::http(410, "gone").is_gone());
        assert!(!CalMeshError::http(500, "boom").is_gone());
        assert!(!CalMeshError::Transport("reset".into()).is_gone());
    }

    #[test]
    fn status_is_preserved_in_display() {
        let err = CalMeshError::http(412, "precondition failed");
        assert_eq!(err.status(), Some(412));
        assert_eq!(err.to_string(), "HTTP 412: precondition failed");
    }
}

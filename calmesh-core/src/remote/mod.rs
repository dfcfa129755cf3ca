//! The calendar backend abstraction.
//!
//! Each provider crate implements [`CalendarRemote`] over its wire client.
//! The reconciler and the orchestrator only talk to this trait, which is what
//! lets tests swap in [`MemoryRemote`].

mod memory;

pub use memory::MemoryRemote;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::date_range::DateRange;
use crate::error::CalMeshResult;
use crate::event::CalendarEvent;

/// What a backend reports back after a create or update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WrittenEvent {
    pub id: String,
    /// New version marker, when the server returned one
    pub version: Option<String>,
    pub href: Option<String>,
}

/// Identity of an existing event on a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventRef<'a> {
    pub id: &'a str,
    pub href: Option<&'a str>,
}

impl<'a> EventRef<'a> {
    pub fn new(id: &'a str, href: Option<&'a str>) -> Self {
        EventRef { id, href }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarInfo {
    /// Provider calendar id (absolute collection URL on CalDAV)
    pub id: String,
    pub display_name: String,
}

#[async_trait]
pub trait CalendarRemote: Send + Sync {
    /// Short backend name for logs and action lines.
    fn name(&self) -> &str;

    /// True when deleted events simply disappear from listings instead of
    /// coming back as cancelled tombstones.
    fn reports_deletions_by_absence(&self) -> bool;

    async fn list_calendars(&self) -> CalMeshResult<Vec<CalendarInfo>>;

    async fn create_calendar(&self, name: &str) -> CalMeshResult<CalendarInfo>;

    /// Events of a calendar inside `range`. Cancelled events are included
    /// (with `cancelled = true`) where the backend keeps them.
    async fn list_events(&self, calendar_id: &str, range: &DateRange) -> CalMeshResult<Vec<CalendarEvent>>;

    /// Create `event` as a new resource. The backend assigns the id.
    async fn create_event(&self, calendar_id: &str, event: &CalendarEvent) -> CalMeshResult<WrittenEvent>;

    /// Overwrite an existing event with the content of `event`.
    async fn update_event(
        &self,
        calendar_id: &str,
        target: &EventRef<'_>,
        event: &CalendarEvent,
    ) -> CalMeshResult<WrittenEvent>;

    /// Delete an event. Backends may report an already-deleted event either
    /// as success or as a 404/410 error; callers treat both as deleted.
    async fn delete_event(&self, calendar_id: &str, target: &EventRef<'_>) -> CalMeshResult<()>;
}

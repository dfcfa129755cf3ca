//! In-memory [`CalendarRemote`] for tests and dry runs.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;

use crate::date_range::DateRange;
use crate::error::{CalMeshError, CalMeshResult};
use crate::event::CalendarEvent;
use crate::remote::{CalendarInfo, CalendarRemote, EventRef, WrittenEvent};

#[derive(Debug, Default)]
struct MemoryCalendar {
    display_name: String,
    events: BTreeMap<String, CalendarEvent>,
}

#[derive(Debug, Default)]
struct State {
    calendars: BTreeMap<String, MemoryCalendar>,
    next_version: u64,
    writes: usize,
    deletions: Vec<(String, Option<String>)>,
    failing_events: HashSet<String>,
    failing_calendars: BTreeMap<String, u16>,
}

impl State {
    fn bump_version(&mut self) -> String {
        self.next_version += 1;
        format!("\"v{}\"", self.next_version)
    }

    fn calendar_mut(&mut self, calendar_id: &str) -> CalMeshResult<&mut MemoryCalendar> {
        if let Some(&status) = self.failing_calendars.get(calendar_id) {
            return Err(CalMeshError::http(status, format!("calendar {calendar_id} unavailable")));
        }
        self.calendars
            .get_mut(calendar_id)
            .ok_or_else(|| CalMeshError::http(404, format!("calendar {calendar_id} not found")))
    }

    fn check_writable(&self, event_id: &str) -> CalMeshResult<()> {
        if self.failing_events.contains(event_id) {
            return Err(CalMeshError::http(500, format!("write to {event_id} rejected")));
        }
        Ok(())
    }
}

/// A calendar backend held entirely in memory.
///
/// Two deletion styles are supported. With `deletions_by_absence` set,
/// deleted events vanish (CalDAV-like). Otherwise they stay listed with
/// `cancelled = true` (REST tombstones).
#[derive(Debug)]
pub struct MemoryRemote {
    name: String,
    deletions_by_absence: bool,
    write_versions: bool,
    state: Mutex<State>,
}

impl MemoryRemote {
    pub fn new(name: impl Into<String>, deletions_by_absence: bool) -> Self {
        MemoryRemote {
            name: name.into(),
            deletions_by_absence,
            write_versions: true,
            state: Mutex::new(State::default()),
        }
    }

    /// Leave `version` unset in write responses, like a server that sends no
    /// ETag on PUT. Stored events still get a version.
    pub fn without_write_versions(mut self) -> Self {
        self.write_versions = false;
        self
    }

    /// A REST-style backend that keeps cancelled tombstones.
    pub fn with_tombstones(name: impl Into<String>) -> Self {
        MemoryRemote::new(name, false)
    }

    /// A CalDAV-style backend where deleted events disappear.
    pub fn with_absence(name: impl Into<String>) -> Self {
        MemoryRemote::new(name, true)
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn add_calendar(&self, id: &str, display_name: &str) {
        self.state().calendars.insert(
            id.to_string(),
            MemoryCalendar {
                display_name: display_name.to_string(),
                events: BTreeMap::new(),
            },
        );
    }

    /// Store an event as if a user created it. A version is assigned when missing.
    pub fn insert_event(&self, calendar_id: &str, mut event: CalendarEvent) {
        let mut state = self.state();
        if event.version.is_none() {
            event.version = Some(state.bump_version());
        }
        if event.last_modified.is_none() {
            event.last_modified = Some(Utc::now());
        }
        state
            .calendars
            .entry(calendar_id.to_string())
            .or_default()
            .events
            .insert(event.id.clone(), event);
    }

    /// Apply a user edit to an event, bumping its version.
    /// Returns false if the event does not exist.
    pub fn edit_event(&self, calendar_id: &str, event_id: &str, edit: impl FnOnce(&mut CalendarEvent)) -> bool {
        let mut state = self.state();
        let version = state.bump_version();
        let Some(event) = state
            .calendars
            .get_mut(calendar_id)
            .and_then(|c| c.events.get_mut(event_id))
        else {
            return false;
        };
        edit(event);
        event.version = Some(version);
        event.last_modified = Some(Utc::now());
        true
    }

    /// Delete an event the way a user would on this backend.
    pub fn user_delete(&self, calendar_id: &str, event_id: &str) {
        let mut state = self.state();
        let version = state.bump_version();
        let absence = self.deletions_by_absence;
        if let Some(calendar) = state.calendars.get_mut(calendar_id) {
            if absence {
                calendar.events.remove(event_id);
            } else if let Some(event) = calendar.events.get_mut(event_id) {
                event.cancelled = true;
                event.version = Some(version);
                event.last_modified = Some(Utc::now());
            }
        }
    }

    pub fn event(&self, calendar_id: &str, event_id: &str) -> Option<CalendarEvent> {
        self.state()
            .calendars
            .get(calendar_id)
            .and_then(|c| c.events.get(event_id))
            .cloned()
    }

    /// All events of a calendar, cancelled ones included.
    pub fn events(&self, calendar_id: &str) -> Vec<CalendarEvent> {
        self.state()
            .calendars
            .get(calendar_id)
            .map(|c| c.events.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Events that are not cancelled.
    pub fn live_events(&self, calendar_id: &str) -> Vec<CalendarEvent> {
        self.events(calendar_id)
            .into_iter()
            .filter(|e| !e.cancelled)
            .collect()
    }

    pub fn calendar_names(&self) -> Vec<String> {
        self.state()
            .calendars
            .values()
            .map(|c| c.display_name.clone())
            .collect()
    }

    /// Number of create/update/delete calls that reached this backend.
    pub fn writes(&self) -> usize {
        self.state().writes
    }

    /// `(id, href)` of every delete request, in order.
    pub fn deleted_refs(&self) -> Vec<(String, Option<String>)> {
        self.state().deletions.clone()
    }

    /// Make every write to `event_id` fail with HTTP 500.
    pub fn fail_writes_to(&self, event_id: &str) {
        self.state().failing_events.insert(event_id.to_string());
    }

    /// Make every request against `calendar_id` fail with `status`.
    pub fn fail_calendar(&self, calendar_id: &str, status: u16) {
        self.state()
            .failing_calendars
            .insert(calendar_id.to_string(), status);
    }

    pub fn remove_calendar(&self, calendar_id: &str) {
        self.state().calendars.remove(calendar_id);
    }

    fn href_for(&self, calendar_id: &str, event_id: &str) -> Option<String> {
        self.deletions_by_absence
            .then(|| format!("{calendar_id}{event_id}.ics"))
    }
}

#[async_trait]
impl CalendarRemote for MemoryRemote {
    fn name(&self) -> &str {
        &self.name
    }

    fn reports_deletions_by_absence(&self) -> bool {
        self.deletions_by_absence
    }

    async fn list_calendars(&self) -> CalMeshResult<Vec<CalendarInfo>> {
        Ok(self
            .state()
            .calendars
            .iter()
            .map(|(id, c)| CalendarInfo {
                id: id.clone(),
                display_name: c.display_name.clone(),
            })
            .collect())
    }

    async fn create_calendar(&self, name: &str) -> CalMeshResult<CalendarInfo> {
        let id = if self.deletions_by_absence {
            format!("memory://{}/{}/", self.name, uuid::Uuid::new_v4())
        } else {
            format!("{}@{}", uuid::Uuid::new_v4(), self.name)
        };
        self.add_calendar(&id, name);
        Ok(CalendarInfo {
            id,
            display_name: name.to_string(),
        })
    }

    async fn list_events(&self, calendar_id: &str, range: &DateRange) -> CalMeshResult<Vec<CalendarEvent>> {
        let mut state = self.state();
        let calendar = state.calendar_mut(calendar_id)?;
        Ok(calendar
            .events
            .values()
            .filter(|e| range.contains(e.start.to_utc()))
            .cloned()
            .collect())
    }

    async fn create_event(&self, calendar_id: &str, event: &CalendarEvent) -> CalMeshResult<WrittenEvent> {
        let id = uuid::Uuid::new_v4().to_string();
        let href = self.href_for(calendar_id, &id);

        let mut state = self.state();
        state.calendar_mut(calendar_id)?;
        state.check_writable(&event.id)?;
        state.writes += 1;
        let version = state.bump_version();

        let stored = CalendarEvent {
            version: Some(version.clone()),
            last_modified: Some(Utc::now()),
            ..event.with_identity(&id, href.as_deref())
        };
        state.calendar_mut(calendar_id)?.events.insert(id.clone(), stored);

        Ok(WrittenEvent {
            id,
            version: self.write_versions.then_some(version),
            href,
        })
    }

    async fn update_event(
        &self,
        calendar_id: &str,
        target: &EventRef<'_>,
        event: &CalendarEvent,
    ) -> CalMeshResult<WrittenEvent> {
        let mut state = self.state();
        state.check_writable(target.id)?;
        if !state.calendar_mut(calendar_id)?.events.contains_key(target.id) {
            return Err(CalMeshError::http(404, format!("event {} not found", target.id)));
        }
        state.writes += 1;
        let version = state.bump_version();

        let href = target
            .href
            .map(str::to_string)
            .or_else(|| self.href_for(calendar_id, target.id));
        let stored = CalendarEvent {
            version: Some(version.clone()),
            last_modified: Some(Utc::now()),
            ..event.with_identity(target.id, href.as_deref())
        };
        state
            .calendar_mut(calendar_id)?
            .events
            .insert(target.id.to_string(), stored);

        Ok(WrittenEvent {
            id: target.id.to_string(),
            version: self.write_versions.then_some(version),
            href,
        })
    }

    async fn delete_event(&self, calendar_id: &str, target: &EventRef<'_>) -> CalMeshResult<()> {
        let mut state = self.state();
        state.check_writable(target.id)?;
        state.writes += 1;
        state
            .deletions
            .push((target.id.to_string(), target.href.map(str::to_string)));
        let version = state.bump_version();
        let absence = self.deletions_by_absence;

        let calendar = state.calendar_mut(calendar_id)?;
        if absence {
            return match calendar.events.remove(target.id) {
                Some(_) => Ok(()),
                None => Err(CalMeshError::http(404, format!("event {} not found", target.id))),
            };
        }
        match calendar.events.get_mut(target.id) {
            Some(event) if !event.cancelled => {
                event.cancelled = true;
                event.version = Some(version);
                event.last_modified = Some(Utc::now());
                Ok(())
            }
            _ => Err(CalMeshError::http(410, format!("event {} already deleted", target.id))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventTime;
    use chrono::{Duration, TimeZone};

    fn event(id: &str) -> CalendarEvent {
        let start = Utc.with_ymd_and_hms(2025, 5, 1, 9, 0, 0).unwrap();
        CalendarEvent::new(
            id,
            "Dentist",
            EventTime::DateTime(start),
            EventTime::DateTime(start + Duration::hours(1)),
        )
    }

    #[tokio::test]
    async fn tombstone_backend_keeps_cancelled_events() {
        let remote = MemoryRemote::with_tombstones("google");
        remote.add_calendar("primary", "Personal");
        let written = remote.create_event("primary", &event("local")).await.unwrap();

        remote
            .delete_event("primary", &EventRef::new(&written.id, None))
            .await
            .unwrap();

        let listed = remote
            .list_events("primary", &DateRange::since(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()))
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].cancelled);

        let again = remote
            .delete_event("primary", &EventRef::new(&written.id, None))
            .await
            .unwrap_err();
        assert!(again.is_gone());
    }

    #[tokio::test]
    async fn absence_backend_assigns_hrefs_and_forgets_deleted_events() {
        let remote = MemoryRemote::with_absence("caldav");
        remote.add_calendar("https://dav/cal/", "Personal");
        let written = remote.create_event("https://dav/cal/", &event("x")).await.unwrap();

        assert_eq!(written.href, Some(format!("https://dav/cal/{}.ics", written.id)));
        assert!(written.version.is_some());

        remote.user_delete("https://dav/cal/", &written.id);
        assert!(remote.events("https://dav/cal/").is_empty());
        assert_eq!(remote.writes(), 1);
    }

    #[tokio::test]
    async fn write_versions_can_be_withheld() {
        let remote = MemoryRemote::with_absence("caldav").without_write_versions();
        remote.add_calendar("https://dav/cal/", "Personal");
        let written = remote.create_event("https://dav/cal/", &event("x")).await.unwrap();

        assert!(written.version.is_none());
        assert!(remote.event("https://dav/cal/", &written.id).unwrap().version.is_some());
    }

    #[tokio::test]
    async fn failing_calendar_reports_status() {
        let remote = MemoryRemote::with_absence("caldav");
        remote.add_calendar("cal", "Work");
        remote.fail_calendar("cal", 410);

        let err = remote.list_events("cal", &DateRange::default()).await.unwrap_err();
        assert!(err.is_gone());
    }
}

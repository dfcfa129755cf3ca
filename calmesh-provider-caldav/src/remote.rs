//! `CalendarRemote` over a CalDAV account.

use async_trait::async_trait;
use calmesh_core::{CalMeshResult, CalendarEvent, CalendarInfo, CalendarRemote, DateRange, EventRef, WrittenEvent};
use tokio::sync::OnceCell;

use crate::client::{CaldavClient, CaldavCredentials, event_url};

/// CalDAV backend. The calendar home is discovered on first use and cached
/// for the lifetime of the value (one sync run).
pub struct CaldavRemote {
    client: CaldavClient,
    home: OnceCell<String>,
    vevent_only: bool,
}

impl CaldavRemote {
    pub fn new(credentials: CaldavCredentials) -> CalMeshResult<Self> {
        Ok(CaldavRemote {
            client: CaldavClient::new(credentials)?,
            home: OnceCell::new(),
            vevent_only: true,
        })
    }

    /// Also list collections that declare no VEVENT support.
    pub fn with_vevent_only(mut self, vevent_only: bool) -> Self {
        self.vevent_only = vevent_only;
        self
    }

    pub fn client(&self) -> &CaldavClient {
        &self.client
    }

    async fn home(&self) -> &str {
        self.home
            .get_or_init(|| self.client.discover_home())
            .await
    }
}

#[async_trait]
impl CalendarRemote for CaldavRemote {
    fn name(&self) -> &str {
        "caldav"
    }

    fn reports_deletions_by_absence(&self) -> bool {
        true
    }

    async fn list_calendars(&self) -> CalMeshResult<Vec<CalendarInfo>> {
        let home = self.home().await;
        self.client.list_calendars(home, self.vevent_only).await
    }

    async fn create_calendar(&self, name: &str) -> CalMeshResult<CalendarInfo> {
        let home = self.home().await;
        self.client.create_calendar(home, name).await
    }

    async fn list_events(&self, calendar_id: &str, range: &DateRange) -> CalMeshResult<Vec<CalendarEvent>> {
        self.client.list_events(calendar_id, range).await
    }

    async fn create_event(&self, calendar_id: &str, event: &CalendarEvent) -> CalMeshResult<WrittenEvent> {
        self.client.create_event(calendar_id, event).await
    }

    async fn update_event(
        &self,
        calendar_id: &str,
        target: &EventRef<'_>,
        event: &CalendarEvent,
    ) -> CalMeshResult<WrittenEvent> {
        self.client
            .update_event(calendar_id, target.id, event, target.href)
            .await
    }

    async fn delete_event(&self, calendar_id: &str, target: &EventRef<'_>) -> CalMeshResult<()> {
        let href = target
            .href
            .map_or_else(|| event_url(calendar_id, target.id), str::to_string);
        self.client.delete_event(&href).await
    }
}

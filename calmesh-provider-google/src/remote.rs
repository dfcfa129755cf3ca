//! `CalendarRemote` over a Google account.

use std::sync::Arc;

use async_trait::async_trait;
use calmesh_core::{CalMeshResult, CalendarEvent, CalendarInfo, CalendarRemote, DateRange, EventRef, WrittenEvent};

use crate::api::GoogleClient;
use crate::session::TokenRefreshHook;
use crate::types::{GoogleConfig, GoogleTokens};

/// Google backend. Deleted events are listed as cancelled tombstones, and the
/// listing window is open-ended from `range.from`.
pub struct GoogleRemote {
    client: GoogleClient,
}

impl GoogleRemote {
    pub fn new(config: GoogleConfig, tokens: GoogleTokens, hook: Arc<dyn TokenRefreshHook>) -> CalMeshResult<Self> {
        Ok(GoogleRemote {
            client: GoogleClient::new(config, tokens, hook)?,
        })
    }

    pub fn client(&self) -> &GoogleClient {
        &self.client
    }
}

#[async_trait]
impl CalendarRemote for GoogleRemote {
    fn name(&self) -> &str {
        "google"
    }

    fn reports_deletions_by_absence(&self) -> bool {
        false
    }

    async fn list_calendars(&self) -> CalMeshResult<Vec<CalendarInfo>> {
        self.client.list_calendars().await
    }

    async fn create_calendar(&self, name: &str) -> CalMeshResult<CalendarInfo> {
        self.client.create_calendar(name).await
    }

    async fn list_events(&self, calendar_id: &str, range: &DateRange) -> CalMeshResult<Vec<CalendarEvent>> {
        self.client.list_events(calendar_id, range.from, true).await
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
        self.client.update_event(calendar_id, target.id, event).await
    }

    async fn delete_event(&self, calendar_id: &str, target: &EventRef<'_>) -> CalMeshResult<()> {
        self.client.delete_event(calendar_id, target.id).await
    }
}

//! Calendar v3 operations over an authenticated [`Session`].

use std::sync::Arc;

use calmesh_core::{CalMeshError, CalMeshResult, CalendarEvent, CalendarInfo, WrittenEvent};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::de::DeserializeOwned;
use tracing::debug;
use url::Url;

use crate::convert::{FromGoogle, ToGoogle};
use crate::session::{Session, TokenRefreshHook};
use crate::types::{CalendarListPage, EventListPage, GoogleCalendar, GoogleConfig, GoogleEvent, GoogleTokens};

const MAX_RESULTS: &str = "2500";

pub struct GoogleClient {
    session: Session,
}

impl GoogleClient {
    pub fn new(config: GoogleConfig, tokens: GoogleTokens, hook: Arc<dyn TokenRefreshHook>) -> CalMeshResult<Self> {
        Ok(GoogleClient {
            session: Session::new(config, tokens, hook)?,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// All events starting from `since`, following `nextPageToken`.
    ///
    /// Recurring events come back as their master entry. With
    /// `include_cancelled`, deleted events are returned with `cancelled = true`.
    pub async fn list_events(
        &self,
        calendar_id: &str,
        since: DateTime<Utc>,
        include_cancelled: bool,
    ) -> CalMeshResult<Vec<CalendarEvent>> {
        let url = self.endpoint(&["calendars", calendar_id, "events"])?;
        let time_min = since.to_rfc3339_opts(SecondsFormat::Secs, true);
        let show_deleted = include_cancelled.to_string();

        let mut events = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page: EventListPage = self
                .get_json(&url, |query| {
                    query.push(("timeMin", time_min.clone()));
                    query.push(("showDeleted", show_deleted.clone()));
                    query.push(("singleEvents", "false".to_string()));
                    query.push(("maxResults", MAX_RESULTS.to_string()));
                    if let Some(token) = &page_token {
                        query.push(("pageToken", token.clone()));
                    }
                })
                .await?;

            let fetched = page.items.len();
            events.extend(page.items.into_iter().filter_map(CalendarEvent::from_google));
            debug!(calendar_id, fetched, "fetched events page");

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(events)
    }

    pub async fn create_event(&self, calendar_id: &str, event: &CalendarEvent) -> CalMeshResult<WrittenEvent> {
        let url = self.endpoint(&["calendars", calendar_id, "events"])?;
        let body = event.to_google();

        let response = self
            .session
            .send(|http| http.post(url.clone()).json(&body))
            .await?;
        written(read_json(response).await?)
    }

    pub async fn update_event(&self, calendar_id: &str, event_id: &str, event: &CalendarEvent) -> CalMeshResult<WrittenEvent> {
        let url = self.endpoint(&["calendars", calendar_id, "events", event_id])?;
        let body = event.to_google();

        let response = self
            .session
            .send(|http| http.put(url.clone()).json(&body))
            .await?;
        written(read_json(response).await?)
    }

    /// Delete an event. 410 Gone (already deleted) counts as success.
    pub async fn delete_event(&self, calendar_id: &str, event_id: &str) -> CalMeshResult<()> {
        let url = self.endpoint(&["calendars", calendar_id, "events", event_id])?;

        match self.session.send(|http| http.delete(url.clone())).await {
            Ok(_) => Ok(()),
            Err(e) if e.status() == Some(410) => {
                debug!(event_id, "event already deleted");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn list_calendars(&self) -> CalMeshResult<Vec<CalendarInfo>> {
        let url = self.endpoint(&["users", "me", "calendarList"])?;

        let mut calendars = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page: CalendarListPage = self
                .get_json(&url, |query| {
                    if let Some(token) = &page_token {
                        query.push(("pageToken", token.clone()));
                    }
                })
                .await?;

            calendars.extend(page.items.into_iter().filter(|c| !c.id.is_empty()).map(calendar_info));

            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }

        Ok(calendars)
    }

    pub async fn create_calendar(&self, name: &str) -> CalMeshResult<CalendarInfo> {
        let url = self.endpoint(&["calendars"])?;
        let body = GoogleCalendar {
            id: String::new(),
            summary: name.to_string(),
        };

        let response = self
            .session
            .send(|http| http.post(url.clone()).json(&body))
            .await?;
        let created: GoogleCalendar = read_json(response).await?;

        if created.id.is_empty() {
            return Err(CalMeshError::Serialization("created calendar has no id".into()));
        }
        Ok(calendar_info(created))
    }

    async fn get_json<T, Q>(&self, url: &Url, add_query: Q) -> CalMeshResult<T>
    where
        T: DeserializeOwned,
        Q: Fn(&mut Vec<(&'static str, String)>),
    {
        let mut query = Vec::new();
        add_query(&mut query);

        let response = self
            .session
            .send(|http| http.get(url.clone()).query(&query))
            .await?;
        read_json(response).await
    }

    /// `{api_base}/{segments...}` with each segment percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> CalMeshResult<Url> {
        let base = &self.session.config().api_base;
        let mut url = Url::parse(base).map_err(|e| CalMeshError::Config(format!("invalid API base {base}: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| CalMeshError::Config(format!("API base cannot hold a path: {base}")))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> CalMeshResult<T> {
    let text = response
        .text()
        .await
        .map_err(|e| CalMeshError::Transport(e.to_string()))?;
    Ok(serde_json::from_str(&text)?)
}

fn written(event: GoogleEvent) -> CalMeshResult<WrittenEvent> {
    let id = event
        .id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| CalMeshError::Serialization("event response has no id".into()))?;

    Ok(WrittenEvent {
        id,
        version: event.etag,
        href: None,
    })
}

fn calendar_info(calendar: GoogleCalendar) -> CalendarInfo {
    let display_name = if calendar.summary.is_empty() {
        "(unnamed)".to_string()
    } else {
        calendar.summary
    };
    CalendarInfo {
        id: calendar.id,
        display_name,
    }
}

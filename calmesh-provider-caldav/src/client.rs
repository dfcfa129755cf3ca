//! CalDAV wire client: discovery, calendar listing and event resources.

use calmesh_core::ics::{generate_ics, parse_event};
use calmesh_core::{CalMeshError, CalMeshResult, CalendarEvent, CalendarInfo, DateRange, WrittenEvent};
use reqwest::header::{CONTENT_TYPE, ETAG, IF_NONE_MATCH};
use reqwest::{Method, RequestBuilder, Response};
use tracing::{debug, warn};
use url::Url;

use crate::xml::{DavResponse, parse_multistatus};

const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";
const ICS_CONTENT_TYPE: &str = "text/calendar; charset=utf-8";

const PRINCIPAL_BODY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:current-user-principal/>
  </d:prop>
</d:propfind>"#;

const HOME_SET_BODY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<d:propfind xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:prop>
    <c:calendar-home-set/>
  </d:prop>
</d:propfind>"#;

const CALENDARS_BODY: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<d:propfind xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:prop>
    <d:displayname/>
    <d:resourcetype/>
    <c:supported-calendar-component-set/>
  </d:prop>
</d:propfind>"#;

/// Credentials for a CalDAV server (HTTP Basic).
#[derive(Clone)]
pub struct CaldavCredentials {
    pub server_url: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for CaldavCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaldavCredentials")
            .field("server_url", &self.server_url)
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct CaldavClient {
    http: reqwest::Client,
    credentials: CaldavCredentials,
}

impl CaldavClient {
    pub fn new(credentials: CaldavCredentials) -> CalMeshResult<Self> {
        // iCloud redirects to a per-user pXX-caldav.icloud.com host
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()
            .map_err(transport)?;
        Ok(CaldavClient { http, credentials })
    }

    pub fn server_url(&self) -> &str {
        &self.credentials.server_url
    }

    /// Find the calendar home collection.
    ///
    /// Follows `current-user-principal` then `calendar-home-set`. If any step
    /// fails, the conventional `{server}/{username}/calendars/` is returned.
    pub async fn discover_home(&self) -> String {
        match self.try_discover_home().await {
            Ok(home) => home,
            Err(e) => {
                let fallback = self.fallback_home_url();
                warn!(server = %self.credentials.server_url, "calendar home discovery failed ({e}), using {fallback}");
                fallback
            }
        }
    }

    async fn try_discover_home(&self) -> CalMeshResult<String> {
        let root = parse_url(&self.credentials.server_url)?;
        let (base, responses) = self.propfind(root, "0", PRINCIPAL_BODY).await?;
        let principal = responses
            .iter()
            .find_map(|r| r.first_href("current-user-principal"))
            .ok_or_else(|| CalMeshError::Xml("no current-user-principal in response".into()))?;
        let principal_url = join(&base, principal)?;

        let (base, responses) = self.propfind(principal_url, "0", HOME_SET_BODY).await?;
        let home = responses
            .iter()
            .find_map(|r| r.first_href("calendar-home-set"))
            .ok_or_else(|| CalMeshError::Xml("no calendar-home-set in response".into()))?;

        Ok(with_trailing_slash(join(&base, home)?.to_string()))
    }

    fn fallback_home_url(&self) -> String {
        format!(
            "{}/{}/calendars/",
            self.credentials.server_url.trim_end_matches('/'),
            self.credentials.username
        )
    }

    /// Calendar collections under `home_url`.
    ///
    /// With `vevent_only`, collections that declare their supported
    /// components and leave out VEVENT (task lists, reminders) are skipped.
    pub async fn list_calendars(&self, home_url: &str, vevent_only: bool) -> CalMeshResult<Vec<CalendarInfo>> {
        let (base, responses) = self
            .propfind(parse_url(home_url)?, "1", CALENDARS_BODY)
            .await?;

        let calendars = responses
            .iter()
            .filter(|r| r.prop("resourcetype").is_some_and(|p| p.has_child("calendar")))
            .filter(|r| !vevent_only || supports_events(r))
            .filter_map(|r| {
                let url = with_trailing_slash(join(&base, &r.href).ok()?.to_string());
                let display_name = r
                    .text("displayname")
                    .map(str::to_string)
                    .unwrap_or_else(|| last_segment(&url));
                Some(CalendarInfo { id: url, display_name })
            })
            .collect();

        Ok(calendars)
    }

    /// Events of a calendar whose occurrences intersect `range`.
    pub async fn list_events(&self, calendar_url: &str, range: &DateRange) -> CalMeshResult<Vec<CalendarEvent>> {
        let body = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<c:calendar-query xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:prop>
    <d:getetag/>
    <c:calendar-data/>
  </d:prop>
  <c:filter>
    <c:comp-filter name="VCALENDAR">
      <c:comp-filter name="VEVENT">
        <c:time-range start="{}" end="{}"/>
      </c:comp-filter>
    </c:comp-filter>
  </c:filter>
</c:calendar-query>"#,
            range.caldav_from(),
            range.caldav_to()
        );

        let url = parse_url(calendar_url)?;
        let request = self
            .http
            .request(dav_method(b"REPORT")?, url)
            .header(CONTENT_TYPE, XML_CONTENT_TYPE)
            .header("Depth", "1")
            .body(body);
        let response = self.send(request).await?;
        let base = response.url().clone();
        let text = response.text().await.map_err(transport)?;

        let events = parse_multistatus(&text)?
            .into_iter()
            .filter_map(|r| {
                let data = r.text("calendar-data")?;
                let Some(mut event) = parse_event(data) else {
                    debug!(href = %r.href, "skipping resource without a usable VEVENT");
                    return None;
                };
                event.version = r.text("getetag").map(str::to_string);
                event.href = join(&base, &r.href).ok().map(|u| u.to_string());
                Some(event)
            })
            .collect();

        Ok(events)
    }

    /// PUT a new resource named by a fresh UUID, which also becomes the UID.
    pub async fn create_event(&self, calendar_url: &str, event: &CalendarEvent) -> CalMeshResult<WrittenEvent> {
        let uid = uuid::Uuid::new_v4().to_string();
        let url = event_url(calendar_url, &uid);
        let ics = generate_ics(&event.with_identity(&uid, Some(&url)));

        let request = self
            .http
            .put(parse_url(&url)?)
            .header(CONTENT_TYPE, ICS_CONTENT_TYPE)
            .header(IF_NONE_MATCH, "*")
            .body(ics);
        let response = self.send(request).await?;

        Ok(WrittenEvent {
            id: uid,
            version: etag(&response),
            href: Some(url),
        })
    }

    /// Overwrite the resource of event `id`, at `known_href` when the server relocated it.
    pub async fn update_event(
        &self,
        calendar_url: &str,
        id: &str,
        event: &CalendarEvent,
        known_href: Option<&str>,
    ) -> CalMeshResult<WrittenEvent> {
        let url = known_href.map_or_else(|| event_url(calendar_url, id), str::to_string);
        let ics = generate_ics(&event.with_identity(id, Some(&url)));

        let request = self
            .http
            .put(parse_url(&url)?)
            .header(CONTENT_TYPE, ICS_CONTENT_TYPE)
            .body(ics);
        let response = self.send(request).await?;

        Ok(WrittenEvent {
            id: id.to_string(),
            version: etag(&response),
            href: Some(url),
        })
    }

    /// DELETE a resource. 404/410 count as already deleted.
    pub async fn delete_event(&self, href: &str) -> CalMeshResult<()> {
        match self.send(self.http.delete(parse_url(href)?)).await {
            Ok(_) => Ok(()),
            Err(e) if e.is_gone() => {
                debug!(href, "event already deleted");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// MKCALENDAR a new VEVENT collection under `home_url`.
    pub async fn create_calendar(&self, home_url: &str, name: &str) -> CalMeshResult<CalendarInfo> {
        let url = format!("{}{}/", with_trailing_slash(home_url.to_string()), uuid::Uuid::new_v4());
        let body = format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<c:mkcalendar xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:set>
    <d:prop>
      <d:displayname>{}</d:displayname>
      <c:supported-calendar-component-set>
        <c:comp name="VEVENT"/>
      </c:supported-calendar-component-set>
    </d:prop>
  </d:set>
</c:mkcalendar>"#,
            escape_xml(name)
        );

        let request = self
            .http
            .request(dav_method(b"MKCALENDAR")?, parse_url(&url)?)
            .header(CONTENT_TYPE, XML_CONTENT_TYPE)
            .body(body);
        self.send(request).await?;

        Ok(CalendarInfo {
            id: url,
            display_name: name.to_string(),
        })
    }

    async fn propfind(&self, url: Url, depth: &str, body: &'static str) -> CalMeshResult<(Url, Vec<DavResponse>)> {
        let request = self
            .http
            .request(dav_method(b"PROPFIND")?, url)
            .header(CONTENT_TYPE, XML_CONTENT_TYPE)
            .header("Depth", depth)
            .body(body);
        let response = self.send(request).await?;

        // Relative hrefs resolve against the final URL after redirects
        let base = response.url().clone();
        let text = response.text().await.map_err(transport)?;
        Ok((base, parse_multistatus(&text)?))
    }

    /// Attach Basic auth, send, and turn non-2xx statuses into `CalMeshError::Http`.
    async fn send(&self, request: RequestBuilder) -> CalMeshResult<Response> {
        let response = request
            .basic_auth(&self.credentials.username, Some(&self.credentials.password))
            .send()
            .await
            .map_err(transport)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = body.chars().take(200).collect::<String>();
        Err(CalMeshError::http(status.as_u16(), message))
    }
}

/// Build the URL for an event resource.
pub fn event_url(calendar_url: &str, event_uid: &str) -> String {
    let base = calendar_url.trim_end_matches('/');
    format!("{}/{}.ics", base, event_uid)
}

/// A calendar without a declared component set is assumed to hold events.
fn supports_events(response: &DavResponse) -> bool {
    match response.prop("supported-calendar-component-set") {
        Some(set) if !set.components.is_empty() => set
            .components
            .iter()
            .any(|c| c.eq_ignore_ascii_case("VEVENT")),
        _ => true,
    }
}

fn etag(response: &Response) -> Option<String> {
    response
        .headers()
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn dav_method(name: &[u8]) -> CalMeshResult<Method> {
    Method::from_bytes(name).map_err(|e| CalMeshError::Transport(e.to_string()))
}

fn parse_url(url: &str) -> CalMeshResult<Url> {
    Url::parse(url).map_err(|e| CalMeshError::Config(format!("invalid URL {url}: {e}")))
}

fn join(base: &Url, href: &str) -> CalMeshResult<Url> {
    base.join(href)
        .map_err(|e| CalMeshError::Xml(format!("invalid href {href}: {e}")))
}

fn with_trailing_slash(mut url: String) -> String {
    if !url.ends_with('/') {
        url.push('/');
    }
    url
}

fn last_segment(url: &str) -> String {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or("Calendar")
        .to_string()
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn transport(e: reqwest::Error) -> CalMeshError {
    CalMeshError::Transport(e.to_string())
}

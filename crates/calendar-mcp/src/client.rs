//! Calendar API client.
//!
//! [`CalendarClient`] is the narrow interface the tool dispatcher works
//! against; [`GoogleCalendarClient`] implements it over the Calendar v3 REST
//! API with `reqwest`. Every non-2xx response becomes
//! `ClientError::Remote`; nothing is retried.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use availability_engine::TimeInterval;
use chrono::{DateTime, FixedOffset, NaiveDate};
use reqwest::{Method, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use url::Url;

use crate::auth::CredentialProvider;
use crate::config::CalendarConfig;
use crate::error::ClientError;
use crate::model::{CalendarEvent, EventRequest, EventTime, EventUpdate};

pub type Result<T> = std::result::Result<T, ClientError>;

/// Time window and page size for an event listing.
#[derive(Debug, Clone, PartialEq)]
pub struct EventQuery {
    pub time_min: DateTime<FixedOffset>,
    pub time_max: Option<DateTime<FixedOffset>>,
    pub max_results: Option<u32>,
}

/// Remote calendar operations used by the tools.
#[async_trait]
pub trait CalendarClient: Send + Sync {
    /// Busy intervals of `calendar_id` overlapping `[time_min, time_max)`.
    /// Recurring events arrive already expanded.
    async fn busy_intervals(
        &self,
        calendar_id: &str,
        time_min: DateTime<FixedOffset>,
        time_max: DateTime<FixedOffset>,
    ) -> Result<Vec<TimeInterval>>;

    /// Single (expanded) events ordered by start time.
    async fn list_events(&self, calendar_id: &str, query: &EventQuery)
        -> Result<Vec<CalendarEvent>>;

    async fn get_event(&self, calendar_id: &str, event_id: &str) -> Result<CalendarEvent>;

    async fn insert_event(&self, calendar_id: &str, request: &EventRequest)
        -> Result<CalendarEvent>;

    async fn patch_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        update: &EventUpdate,
    ) -> Result<CalendarEvent>;

    /// The user's default timezone from Calendar settings (IANA name).
    async fn user_timezone(&self) -> Result<String>;
}

// ── Wire types ──────────────────────────────────────────────────────────────

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEventDateTime {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    date_time: Option<DateTime<FixedOffset>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    time_zone: Option<String>,
}

impl GoogleEventDateTime {
    fn timed(at: DateTime<FixedOffset>, time_zone: Option<&str>) -> Self {
        Self {
            date_time: Some(at),
            date: None,
            time_zone: time_zone.map(str::to_string),
        }
    }

    fn to_event_time(&self) -> Option<EventTime> {
        match (self.date_time, self.date) {
            (Some(dt), _) => Some(EventTime::DateTime(dt)),
            (None, Some(date)) => Some(EventTime::Date(date)),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleEvent {
    id: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    start: Option<GoogleEventDateTime>,
    #[serde(default)]
    end: Option<GoogleEventDateTime>,
    #[serde(default)]
    html_link: Option<String>,
}

impl TryFrom<GoogleEvent> for CalendarEvent {
    type Error = ClientError;

    fn try_from(ev: GoogleEvent) -> Result<Self> {
        let start = ev.start.as_ref().and_then(GoogleEventDateTime::to_event_time);
        let end = ev.end.as_ref().and_then(GoogleEventDateTime::to_event_time);
        match (start, end) {
            (Some(start), Some(end)) => Ok(CalendarEvent {
                id: ev.id,
                summary: ev.summary,
                start,
                end,
                location: ev.location,
                description: ev.description,
                html_link: ev.html_link,
            }),
            _ => Err(ClientError::Decode(format!(
                "event {} has no start or end",
                ev.id
            ))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct EventList {
    #[serde(default)]
    items: Vec<GoogleEvent>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EventBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    start: Option<GoogleEventDateTime>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end: Option<GoogleEventDateTime>,
}

impl<'a> From<&'a EventRequest> for EventBody<'a> {
    fn from(req: &'a EventRequest) -> Self {
        let tz = req.time_zone.as_deref();
        Self {
            summary: Some(&req.title),
            description: req.description.as_deref().filter(|s| !s.is_empty()),
            location: req.location.as_deref().filter(|s| !s.is_empty()),
            start: Some(GoogleEventDateTime::timed(req.start, tz)),
            end: Some(GoogleEventDateTime::timed(req.end, tz)),
        }
    }
}

impl<'a> From<&'a EventUpdate> for EventBody<'a> {
    fn from(update: &'a EventUpdate) -> Self {
        let tz = update.time_zone.as_deref();
        Self {
            summary: update.title.as_deref(),
            description: update.description.as_deref(),
            location: update.location.as_deref(),
            start: update.start.map(|s| GoogleEventDateTime::timed(s, tz)),
            end: update.end.map(|e| GoogleEventDateTime::timed(e, tz)),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FreeBusyRequest<'a> {
    time_min: DateTime<FixedOffset>,
    time_max: DateTime<FixedOffset>,
    items: [FreeBusyItem<'a>; 1],
}

#[derive(Debug, Serialize)]
struct FreeBusyItem<'a> {
    id: &'a str,
}

#[derive(Debug, Deserialize)]
struct FreeBusyResponse {
    #[serde(default)]
    calendars: HashMap<String, FreeBusyCalendar>,
}

#[derive(Debug, Default, Deserialize)]
struct FreeBusyCalendar {
    #[serde(default)]
    busy: Vec<BusyPeriod>,
    #[serde(default)]
    errors: Vec<FreeBusyError>,
}

#[derive(Debug, Deserialize)]
struct BusyPeriod {
    start: DateTime<FixedOffset>,
    end: DateTime<FixedOffset>,
}

#[derive(Debug, Deserialize)]
struct FreeBusyError {
    #[serde(default)]
    reason: String,
}

#[derive(Debug, Deserialize)]
struct Setting {
    value: String,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorEnvelope {
    error: GoogleErrorBody,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<GoogleErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorDetail {
    #[serde(default)]
    reason: String,
}

/// Condense a Google error payload into "message (reason, ...)".
fn google_error_message(body: &str) -> String {
    match serde_json::from_str::<GoogleErrorEnvelope>(body) {
        Ok(envelope) => {
            let reasons: Vec<&str> = envelope
                .error
                .errors
                .iter()
                .map(|e| e.reason.as_str())
                .filter(|r| !r.is_empty())
                .collect();
            if reasons.is_empty() {
                envelope.error.message
            } else {
                format!("{} ({})", envelope.error.message, reasons.join(", "))
            }
        }
        Err(_) => body.trim().chars().take(200).collect(),
    }
}

// ── Google implementation ───────────────────────────────────────────────────

/// Calendar v3 REST client authenticated through a [`CredentialProvider`].
pub struct GoogleCalendarClient {
    http: reqwest::Client,
    base_url: Url,
    credentials: Arc<dyn CredentialProvider>,
}

impl GoogleCalendarClient {
    pub fn new(config: &CalendarConfig, credentials: Arc<dyn CredentialProvider>) -> Result<Self> {
        let base_url = Url::parse(&config.api_base_url).map_err(|e| {
            ClientError::Decode(format!("invalid api_base_url '{}': {e}", config.api_base_url))
        })?;
        let http = reqwest::Client::builder()
            .timeout(StdDuration::from_secs(config.request_timeout_secs))
            .user_agent(concat!("calendar-mcp/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ClientError::Transport)?;
        Ok(Self {
            http,
            base_url,
            credentials,
        })
    }

    /// `base_url` with `segments` appended, each percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| ClientError::Decode(format!("base URL {} cannot be a base", self.base_url)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    async fn request(&self, method: Method, url: Url) -> Result<RequestBuilder> {
        let creds = self.credentials.get_valid_credentials().await?;
        debug!(%method, %url, "Calendar API request");
        Ok(self
            .http
            .request(method, url)
            .bearer_auth(creds.access_token))
    }

    async fn send<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T> {
        let resp = builder.send().await.map_err(ClientError::Transport)?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = google_error_message(&body);
            warn!(status = status.as_u16(), %message, "Calendar API error");
            return Err(ClientError::Remote {
                status: status.as_u16(),
                message,
            });
        }
        resp.json::<T>()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }
}

#[async_trait]
impl CalendarClient for GoogleCalendarClient {
    async fn busy_intervals(
        &self,
        calendar_id: &str,
        time_min: DateTime<FixedOffset>,
        time_max: DateTime<FixedOffset>,
    ) -> Result<Vec<TimeInterval>> {
        let body = FreeBusyRequest {
            time_min,
            time_max,
            items: [FreeBusyItem { id: calendar_id }],
        };
        let url = self.endpoint(&["freeBusy"])?;
        let resp: FreeBusyResponse = self
            .send(self.request(Method::POST, url).await?.json(&body))
            .await?;

        let calendar = resp.calendars.get(calendar_id).ok_or_else(|| {
            ClientError::Decode(format!("freeBusy response has no entry for {calendar_id}"))
        })?;
        if let Some(err) = calendar.errors.first() {
            let status = if err.reason == "notFound" { 404 } else { 400 };
            return Err(ClientError::Remote {
                status,
                message: format!("freeBusy error for {calendar_id}: {}", err.reason),
            });
        }

        Ok(calendar
            .busy
            .iter()
            .filter_map(|b| TimeInterval::new(b.start, b.end).ok())
            .collect())
    }

    async fn list_events(
        &self,
        calendar_id: &str,
        query: &EventQuery,
    ) -> Result<Vec<CalendarEvent>> {
        let mut url = self.endpoint(&["calendars", calendar_id, "events"])?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("singleEvents", "true")
                .append_pair("orderBy", "startTime")
                .append_pair("timeMin", &query.time_min.to_rfc3339());
            if let Some(time_max) = query.time_max {
                pairs.append_pair("timeMax", &time_max.to_rfc3339());
            }
            if let Some(max) = query.max_results {
                pairs.append_pair("maxResults", &max.to_string());
            }
        }

        let list: EventList = self.send(self.request(Method::GET, url).await?).await?;
        Ok(list
            .items
            .into_iter()
            .filter_map(|ev| match CalendarEvent::try_from(ev) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(error = %e, "Skipping malformed event");
                    None
                }
            })
            .collect())
    }

    async fn get_event(&self, calendar_id: &str, event_id: &str) -> Result<CalendarEvent> {
        let url = self.endpoint(&["calendars", calendar_id, "events", event_id])?;
        let event: GoogleEvent = self.send(self.request(Method::GET, url).await?).await?;
        event.try_into()
    }

    async fn insert_event(
        &self,
        calendar_id: &str,
        request: &EventRequest,
    ) -> Result<CalendarEvent> {
        let url = self.endpoint(&["calendars", calendar_id, "events"])?;
        let body = EventBody::from(request);
        let event: GoogleEvent = self
            .send(self.request(Method::POST, url).await?.json(&body))
            .await?;
        event.try_into()
    }

    async fn patch_event(
        &self,
        calendar_id: &str,
        event_id: &str,
        update: &EventUpdate,
    ) -> Result<CalendarEvent> {
        let url = self.endpoint(&["calendars", calendar_id, "events", event_id])?;
        let body = EventBody::from(update);
        let event: GoogleEvent = self
            .send(self.request(Method::PATCH, url).await?.json(&body))
            .await?;
        event.try_into()
    }

    async fn user_timezone(&self) -> Result<String> {
        let url = self.endpoint(&["users", "me", "settings", "timezone"])?;
        let setting: Setting = self.send(self.request(Method::GET, url).await?).await?;
        Ok(setting.value)
    }
}

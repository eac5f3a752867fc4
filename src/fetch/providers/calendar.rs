// src/fetch/providers/calendar.rs
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use reqwest::{header::ACCEPT, Client, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::FetchError;
use crate::fetch::types::{Fetcher, Resolved};
use crate::fetch::google;
use crate::model::{Event, EventKind};

const PROVIDER: &str = "calendar";
const API_BASE: &str = "https://www.googleapis.com/calendar/v3";

#[derive(Debug, Deserialize)]
struct EventsResponse {
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    items: Vec<CalendarItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CalendarItem {
    id: String,
    #[serde(default)]
    summary: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    html_link: Option<String>,
    #[serde(default)]
    status: Option<String>,
    start: Option<EventTime>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EventTime {
    #[serde(default)]
    date_time: Option<String>,
    #[serde(default)]
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CalendarMeta {
    #[serde(default)]
    summary: Option<String>,
}

impl EventTime {
    /// Timed events carry an offset; all-day events only a date (taken as
    /// midnight UTC).
    fn to_utc(&self) -> Option<DateTime<Utc>> {
        if let Some(dt) = &self.date_time {
            return DateTime::parse_from_rfc3339(dt)
                .ok()
                .map(|d| d.with_timezone(&Utc));
        }
        let date = NaiveDate::parse_from_str(self.date.as_deref()?, "%Y-%m-%d").ok()?;
        Some(date.and_hms_opt(0, 0, 0)?.and_utc())
    }
}

/// Future, non-cancelled entries ordered by start time.
fn items_to_events(resp: EventsResponse, now: DateTime<Utc>) -> Vec<Event> {
    let calendar = resp.summary;
    let mut out: Vec<Event> = resp
        .items
        .into_iter()
        .filter(|it| it.status.as_deref() != Some("cancelled"))
        .filter_map(|it| {
            let starts_at = it.start.as_ref().and_then(EventTime::to_utc)?;
            if starts_at <= now {
                return None;
            }
            let mut ev = Event::new(
                it.id,
                it.summary.unwrap_or_else(|| "(untitled event)".to_string()),
                EventKind::Scheduled {
                    starts_at,
                    description: it.description.unwrap_or_default(),
                },
            );
            ev.url = it.html_link;
            ev.author = calendar.clone();
            Some(ev)
        })
        .collect();
    out.sort_by_key(|e| match e.kind {
        EventKind::Scheduled { starts_at, .. } => starts_at,
        _ => now,
    });
    out
}

/// Google Calendar: every upcoming entry is an event; newly added entries
/// are announced once.
pub struct CalendarFetcher {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl CalendarFetcher {
    pub fn new(client: Client, api_key: Option<String>) -> Self {
        Self {
            client,
            api_key,
            base_url: API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base: impl Into<String>) -> Self {
        self.base_url = base.into().trim_end_matches('/').to_string();
        self
    }

    /// `calendars/<id>[/<tail>]` with the id percent-encoded as one segment.
    fn url(&self, calendar_id: &str, tail: Option<&str>) -> Result<Url, FetchError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| FetchError::Malformed(format!("calendar base url: {e}")))?;
        {
            let mut segs = url
                .path_segments_mut()
                .map_err(|_| FetchError::Malformed("calendar base url cannot be a base".into()))?;
            segs.push("calendars").push(calendar_id);
            if let Some(t) = tail {
                segs.push(t);
            }
        }
        Ok(url)
    }

    async fn get<T: DeserializeOwned>(
        &self,
        url: Url,
        params: &[(&str, &str)],
        calendar_id: &str,
    ) -> Result<T, FetchError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or(FetchError::MissingCredentials(PROVIDER))?;
        let resp = self
            .client
            .get(url)
            .query(params)
            .query(&[("key", key)])
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        google::parse_body(PROVIDER, calendar_id, status, &body)
    }
}

#[async_trait]
impl Fetcher for CalendarFetcher {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn fetch(&self, calendar_id: &str) -> Result<Vec<Event>, FetchError> {
        let now = Utc::now();
        let time_min = now.to_rfc3339_opts(SecondsFormat::Secs, true);
        let url = self.url(calendar_id, Some("events"))?;
        let resp: EventsResponse = self
            .get(
                url,
                &[
                    ("timeMin", time_min.as_str()),
                    ("singleEvents", "true"),
                    ("orderBy", "startTime"),
                    ("maxResults", "50"),
                ],
                calendar_id,
            )
            .await?;
        Ok(items_to_events(resp, now))
    }

    async fn resolve(&self, query: &str) -> Result<Resolved, FetchError> {
        let id = query.trim();
        let url = self.url(id, None)?;
        let meta: CalendarMeta = self.get(url, &[], id).await?;
        Ok(Resolved {
            id: id.to_string(),
            label: meta.summary,
        })
    }
}

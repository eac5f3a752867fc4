//! YouTube Data API v3 provider.
//!
//! `fetch` lists the latest uploads of a channel through `search`
//! (newest first upstream, reversed here). Statistics are only requested in
//! `enrich`, i.e. for videos that are actually going to be announced.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use reqwest::{header::ACCEPT, Client};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::FetchError;
use crate::fetch::types::{Fetcher, Resolved};
use crate::fetch::{clean_text, google};
use crate::model::{Event, EventKind};

const PROVIDER: &str = "youtube";
const API_BASE: &str = "https://youtube.googleapis.com/youtube/v3";
const SEARCH_PAGE: &str = "15";

fn channel_url_regex() -> &'static Regex {
    static RE: OnceCell<Regex> = OnceCell::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:https?://)?(?:www\.)?youtube\.com/(channel|user)/([\w-]+)")
            .expect("valid regex")
    })
}

pub fn channel_link(channel_id: &str) -> String {
    format!("https://www.youtube.com/channel/{channel_id}")
}

pub fn video_link(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: SearchId,
    snippet: VideoSnippet,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchId {
    #[serde(default)]
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoSnippet {
    published_at: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    channel_title: Option<String>,
    #[serde(default)]
    thumbnails: Thumbnails,
    #[serde(default)]
    live_broadcast_content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnails {
    default: Option<Thumb>,
    high: Option<Thumb>,
}

#[derive(Debug, Deserialize)]
struct Thumb {
    url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelsResponse {
    #[serde(default)]
    items: Vec<ChannelItem>,
}

#[derive(Debug, Deserialize)]
struct ChannelItem {
    id: String,
    #[serde(default)]
    snippet: Option<ChannelSnippet>,
    #[serde(default)]
    statistics: Option<ChannelStatistics>,
}

#[derive(Debug, Deserialize)]
struct ChannelSnippet {
    #[serde(default)]
    title: String,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChannelStatistics {
    #[serde(default)]
    subscriber_count: Option<String>,
    #[serde(default)]
    hidden_subscriber_count: bool,
}

#[derive(Debug, Deserialize)]
struct VideosResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
struct VideoItem {
    #[serde(default)]
    statistics: Option<VideoStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoStatistics {
    #[serde(default)]
    view_count: Option<String>,
    #[serde(default)]
    like_count: Option<String>,
}

/// First paragraph of a video description, capped like an embed body.
fn summary(description: &str) -> String {
    let first = description.split("\n\n").next().unwrap_or_default();
    clean_text(first, 2000)
}

fn parse_ts(s: Option<&str>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn search_to_events(resp: SearchResponse) -> Vec<Event> {
    let mut out: Vec<Event> = resp
        .items
        .into_iter()
        .filter_map(|it| {
            let vid = it.id.video_id?;
            let sn = it.snippet;
            let mut ev = Event::new(
                vid.clone(),
                html_escape::decode_html_entities(&sn.title).to_string(),
                EventKind::Video {
                    live: sn.live_broadcast_content.as_deref() == Some("live"),
                    description: summary(&sn.description),
                    views: None,
                    likes: None,
                    subscribers: None,
                    image: sn.thumbnails.high.map(|t| t.url),
                },
            );
            ev.url = Some(video_link(&vid));
            ev.author = sn.channel_title;
            ev.published_at = parse_ts(sn.published_at.as_deref());
            Some(ev)
        })
        .collect();
    // search?order=date is newest first
    out.reverse();
    out
}

pub struct YouTubeFetcher {
    client: Client,
    api_key: Option<String>,
    base_url: String,
}

impl YouTubeFetcher {
    pub fn new(client: Client, api_key: Option<String>) -> Self {
        Self {
            client,
            api_key,
            base_url: API_BASE.to_string(),
        }
    }

    /// Point at a different API root (tests, proxies).
    pub fn with_base_url(mut self, base: impl Into<String>) -> Self {
        self.base_url = base.into().trim_end_matches('/').to_string();
        self
    }

    async fn call<T: DeserializeOwned>(
        &self,
        service: &str,
        params: &[(&str, &str)],
        source: &str,
    ) -> Result<T, FetchError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or(FetchError::MissingCredentials(PROVIDER))?;
        let resp = self
            .client
            .get(format!("{}/{service}", self.base_url))
            .query(params)
            .query(&[("key", key)])
            .header(ACCEPT, "application/json")
            .send()
            .await?;
        let status = resp.status();
        let body = resp.text().await?;
        google::parse_body(PROVIDER, source, status, &body)
    }

    async fn channel(&self, params: &[(&str, &str)], source: &str) -> Result<Option<ChannelItem>, FetchError> {
        let resp: ChannelsResponse = self.call("channels", params, source).await?;
        Ok(resp.items.into_iter().next())
    }
}

#[async_trait]
impl Fetcher for YouTubeFetcher {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn fetch(&self, channel_id: &str) -> Result<Vec<Event>, FetchError> {
        let resp: SearchResponse = self
            .call(
                "search",
                &[
                    ("part", "snippet"),
                    ("channelId", channel_id),
                    ("maxResults", SEARCH_PAGE),
                    ("order", "date"),
                    ("type", "video"),
                ],
                channel_id,
            )
            .await?;

        if resp.items.is_empty() {
            // search answers an unknown channel with an empty page
            let exists = self
                .channel(&[("part", "id"), ("id", channel_id)], channel_id)
                .await?
                .is_some();
            if !exists {
                return Err(FetchError::NotFound(channel_id.to_string()));
            }
        }
        Ok(search_to_events(resp))
    }

    async fn resolve(&self, query: &str) -> Result<Resolved, FetchError> {
        enum Lookup {
            Id(String),
            Username(String),
        }

        let query = query.trim();
        let candidates = match channel_url_regex().captures(query) {
            Some(c) if &c[1] == "channel" => vec![Lookup::Id(c[2].to_string())],
            Some(c) => vec![Lookup::Username(c[2].to_string())],
            None => vec![
                Lookup::Username(query.to_string()),
                Lookup::Id(query.to_string()),
            ],
        };

        for lookup in candidates {
            let found = match &lookup {
                Lookup::Id(id) => {
                    self.channel(&[("part", "snippet"), ("id", id.as_str())], query)
                        .await?
                }
                Lookup::Username(name) => {
                    self.channel(&[("part", "snippet"), ("forUsername", name.as_str())], query)
                        .await?
                }
            };
            if let Some(ch) = found {
                let label = ch.snippet.map(|s| s.title).filter(|t| !t.is_empty());
                return Ok(Resolved { id: ch.id, label });
            }
        }
        Err(FetchError::NotFound(query.to_string()))
    }

    async fn enrich(&self, channel_id: &str, mut event: Event) -> Event {
        let video: Result<VideosResponse, _> = self
            .call("videos", &[("part", "statistics"), ("id", event.id.as_str())], channel_id)
            .await;
        let channel = self
            .channel(&[("part", "snippet,statistics"), ("id", channel_id)], channel_id)
            .await;

        let (stats, channel) = match (video, channel) {
            (Ok(v), Ok(c)) => (v.items.into_iter().next().and_then(|i| i.statistics), c),
            (Err(e), _) | (_, Err(e)) => {
                tracing::warn!(error = %e, video = %event.id, "youtube enrich failed; posting without statistics");
                return event;
            }
        };

        if let Some(ch) = channel {
            if let Some(sn) = ch.snippet {
                event.thumbnail = sn.thumbnails.default.map(|t| t.url);
                if event.author.is_none() && !sn.title.is_empty() {
                    event.author = Some(sn.title);
                }
            }
            if let EventKind::Video { subscribers, .. } = &mut event.kind {
                *subscribers = ch.statistics.and_then(|s| {
                    if s.hidden_subscriber_count {
                        Some("hidden".to_string())
                    } else {
                        s.subscriber_count
                    }
                });
            }
        }
        if let (Some(st), EventKind::Video { views, likes, .. }) = (stats, &mut event.kind) {
            *views = st.view_count.and_then(|v| v.parse().ok());
            *likes = st.like_count.and_then(|v| v.parse().ok());
        }
        event
    }
}

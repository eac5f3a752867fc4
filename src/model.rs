//! # Data model
//! Sources, subscriptions, seen-records and the events flowing through a
//! poll cycle. Everything persisted here derives serde; events are
//! ephemeral and only serialized for debugging/the static fetcher.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CommandError;

/// Closed set of upstream feed types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Youtube,
    Calendar,
    Rss,
    /// Host-fed fan-community feed (events pushed into a static fetcher).
    Community,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Youtube => "youtube",
            SourceKind::Calendar => "calendar",
            SourceKind::Rss => "rss",
            SourceKind::Community => "community",
        }
    }

    fn from_prefix(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "youtube" | "yt" => Some(SourceKind::Youtube),
            "calendar" | "gcal" => Some(SourceKind::Calendar),
            "rss" => Some(SourceKind::Rss),
            "community" | "weverse" => Some(SourceKind::Community),
            _ => None,
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A source as `kind:id`. The id is whatever the fetcher for that kind
/// understands (channel id, calendar id, feed URL, community name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SourceRef {
    pub kind: SourceKind,
    pub id: String,
}

impl SourceRef {
    pub fn new(kind: SourceKind, id: impl Into<String>) -> Self {
        let id = id.into();
        let id = match kind {
            SourceKind::Community => id.to_lowercase(),
            _ => id,
        };
        Self { kind, id }
    }

    /// Key under which the source is persisted.
    pub fn key(&self) -> String {
        format!("{}:{}", self.kind, self.id)
    }

    /// Parse user input into a kind plus a raw query.
    ///
    /// The query still has to go through `Fetcher::resolve` (a YouTube
    /// username or channel URL is not a channel id yet).
    pub fn parse(input: &str) -> Result<Self, CommandError> {
        let input = input.trim();
        if input.is_empty() {
            return Err(CommandError::UnknownSource(String::new()));
        }

        if let Some((prefix, rest)) = input.split_once(':') {
            if let Some(kind) = SourceKind::from_prefix(prefix) {
                let rest = rest.trim();
                if rest.is_empty() {
                    return Err(CommandError::UnknownSource(input.to_string()));
                }
                return Ok(SourceRef::new(kind, rest));
            }
        }

        let lower = input.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("www.") {
            let kind = if lower.contains("youtube.com/") {
                SourceKind::Youtube
            } else {
                SourceKind::Rss
            };
            return Ok(SourceRef::new(kind, input));
        }
        if lower.starts_with("youtube.com/") {
            return Ok(SourceRef::new(SourceKind::Youtube, input));
        }

        Err(CommandError::UnknownSource(input.to_string()))
    }
}

impl fmt::Display for SourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.id)
    }
}

fn default_true() -> bool {
    true
}

/// One destination receiving a source's notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub destination: String,
    /// Role id mentioned alongside each notification.
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default = "default_true")]
    pub show_comments: bool,
}

impl Subscription {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            role: None,
            show_comments: true,
        }
    }

    pub fn with_role(mut self, role: Option<String>) -> Self {
        self.role = role.filter(|r| !r.is_empty());
        self
    }

    pub fn accepts(&self, event: &Event) -> bool {
        !matches!(event.kind, EventKind::Comment { .. }) || self.show_comments
    }
}

/// Ids already delivered for a source. Only grows, except on reset or
/// source removal.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SeenRecord(BTreeSet<String>);

impl SeenRecord {
    pub fn contains(&self, id: &str) -> bool {
        self.0.contains(id)
    }

    /// Returns how many ids were new.
    pub fn extend<I, S>(&mut self, ids: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let before = self.0.len();
        self.0.extend(ids.into_iter().map(Into::into));
        self.0.len() - before
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }
}

impl<S: Into<String>> FromIterator<S> for SeenRecord {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        SeenRecord(iter.into_iter().map(Into::into).collect())
    }
}

/// Persisted state of one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub source: SourceRef,
    /// Human readable name captured when the source was added.
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
    #[serde(default)]
    pub seen: SeenRecord,
}

impl SourceRecord {
    pub fn new(source: SourceRef, label: Option<String>) -> Self {
        Self {
            source,
            label,
            subscriptions: Vec::new(),
            seen: SeenRecord::default(),
        }
    }

    pub fn display_name(&self) -> String {
        match &self.label {
            Some(label) if !label.is_empty() => format!("{label} ({})", self.source),
            _ => self.source.to_string(),
        }
    }

    pub fn subscription(&self, destination: &str) -> Option<&Subscription> {
        self.subscriptions.iter().find(|s| s.destination == destination)
    }

    pub fn subscription_mut(&mut self, destination: &str) -> Option<&mut Subscription> {
        self.subscriptions
            .iter_mut()
            .find(|s| s.destination == destination)
    }

    /// Insert or replace the subscription for its destination.
    pub fn upsert(&mut self, sub: Subscription) {
        match self.subscription_mut(&sub.destination) {
            Some(existing) => *existing = sub,
            None => self.subscriptions.push(sub),
        }
    }

    pub fn unsubscribe(&mut self, destination: &str) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.destination != destination);
        before != self.subscriptions.len()
    }
}

/// Per-kind payload. One renderer exists for each variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Video {
        #[serde(default)]
        live: bool,
        #[serde(default)]
        description: String,
        #[serde(default)]
        views: Option<u64>,
        #[serde(default)]
        likes: Option<u64>,
        /// `None` when unknown, `Some("hidden")` when the channel hides it.
        #[serde(default)]
        subscribers: Option<String>,
        #[serde(default)]
        image: Option<String>,
    },
    Post {
        body: String,
        #[serde(default)]
        translation: Option<String>,
        #[serde(default)]
        photos: Vec<String>,
    },
    Media {
        body: String,
        #[serde(default)]
        video_link: Option<String>,
    },
    Comment {
        body: String,
        #[serde(default)]
        translation: Option<String>,
    },
    Announcement {
        body: String,
    },
    Scheduled {
        starts_at: DateTime<Utc>,
        #[serde(default)]
        description: String,
    },
}

impl EventKind {
    pub fn tag(&self) -> &'static str {
        match self {
            EventKind::Video { .. } => "video",
            EventKind::Post { .. } => "post",
            EventKind::Media { .. } => "media",
            EventKind::Comment { .. } => "comment",
            EventKind::Announcement { .. } => "announcement",
            EventKind::Scheduled { .. } => "scheduled",
        }
    }
}

/// A notifiable occurrence fetched from a source in one poll cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(flatten)]
    pub kind: EventKind,
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub thumbnail: Option<String>,
}

impl Event {
    pub fn new(id: impl Into<String>, title: impl Into<String>, kind: EventKind) -> Self {
        Self {
            id: id.into(),
            kind,
            title: title.into(),
            url: None,
            author: None,
            published_at: None,
            thumbnail: None,
        }
    }

    /// Short announcement used by tests and host-fed sources.
    pub fn announcement(id: impl Into<String>, body: impl Into<String>) -> Self {
        let id = id.into();
        Event::new(id.clone(), id, EventKind::Announcement { body: body.into() })
    }
}

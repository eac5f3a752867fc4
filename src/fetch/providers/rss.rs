// src/fetch/providers/rss.rs
use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::de::from_str;
use quick_xml::events::Event as XmlEvent;
use quick_xml::Reader;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use time::{format_description::well_known::Rfc2822, OffsetDateTime};

use crate::error::FetchError;
use crate::fetch::clean_text;
use crate::fetch::types::{Fetcher, Resolved};
use crate::model::{Event, EventKind};

const PROVIDER: &str = "rss";

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(default)]
    title: Option<String>,
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    guid: Option<Guid>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    enclosure: Option<Enclosure>,
}

#[derive(Debug, Deserialize)]
struct Guid {
    #[serde(rename = "$text", default)]
    value: String,
}

#[derive(Debug, Deserialize)]
struct Enclosure {
    #[serde(rename = "@url")]
    url: String,
}

// Atom (RFC 4287)

#[derive(Debug, Deserialize)]
struct AtomFeed {
    title: Option<TextNode>,
    #[serde(rename = "entry", default)]
    entry: Vec<AtomEntry>,
}

#[derive(Debug, Deserialize)]
struct AtomEntry {
    id: Option<String>,
    title: Option<TextNode>,
    #[serde(rename = "link", default)]
    link: Vec<AtomLink>,
    updated: Option<String>,
    published: Option<String>,
    summary: Option<TextNode>,
}

#[derive(Debug, Deserialize)]
struct AtomLink {
    #[serde(rename = "@href")]
    href: String,
    #[serde(rename = "@rel", default)]
    rel: Option<String>,
}

/// Element text; attributes such as `type="html"` are ignored.
#[derive(Debug, Deserialize)]
struct TextNode {
    #[serde(rename = "$text", default)]
    value: String,
}

fn parse_rfc2822(ts: &str) -> Option<DateTime<Utc>> {
    let odt = OffsetDateTime::parse(ts.trim(), &Rfc2822).ok()?;
    DateTime::from_timestamp(odt.unix_timestamp(), 0)
}

fn parse_rfc3339(ts: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(ts.trim())
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

/// Local name of the document element (`rss`, `feed`, `RDF`, ...).
fn root_element(xml: &str) -> Option<String> {
    let mut reader = Reader::from_str(xml);
    loop {
        match reader.read_event() {
            Ok(XmlEvent::Start(e)) | Ok(XmlEvent::Empty(e)) => {
                return Some(String::from_utf8_lossy(e.local_name().as_ref()).into_owned())
            }
            Ok(XmlEvent::Eof) | Err(_) => return None,
            Ok(_) => {}
        }
    }
}

fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}

/// Feed title plus its items as events, oldest first. Accepts RSS 2.0 and
/// Atom documents.
pub fn parse_feed(xml: &str) -> anyhow::Result<(Option<String>, Vec<Event>)> {
    let xml_clean = scrub_html_entities_for_xml(xml);
    let (title, events) = match root_element(&xml_clean).as_deref() {
        Some("feed") => parse_atom(&xml_clean)?,
        _ => parse_rss(&xml_clean)?,
    };
    Ok((title, oldest_first(events)))
}

fn parse_rss(xml: &str) -> anyhow::Result<(Option<String>, Vec<Event>)> {
    let rss: Rss = from_str(xml).context("parsing rss xml")?;
    let feed_title = rss.channel.title.map(|t| clean_text(&t, 256));

    let mut out = Vec::with_capacity(rss.channel.item.len());
    for it in rss.channel.item {
        let title = clean_text(it.title.as_deref().unwrap_or_default(), 256);
        let id = it
            .guid
            .map(|g| g.value.trim().to_string())
            .filter(|g| !g.is_empty())
            .or_else(|| it.link.clone())
            .unwrap_or_else(|| title.clone());
        if id.is_empty() {
            continue;
        }

        let body = clean_text(it.description.as_deref().unwrap_or_default(), 2000);
        let kind = match it.enclosure {
            Some(enc) => EventKind::Media {
                body,
                video_link: Some(enc.url),
            },
            None => EventKind::Post {
                body,
                translation: None,
                photos: Vec::new(),
            },
        };

        let mut ev = Event::new(id, title, kind);
        ev.url = it.link;
        ev.author = feed_title.clone();
        ev.published_at = it
            .pub_date
            .as_deref()
            .and_then(|d| parse_rfc2822(d).or_else(|| parse_rfc3339(d)));
        out.push(ev);
    }
    Ok((feed_title, out))
}

fn parse_atom(xml: &str) -> anyhow::Result<(Option<String>, Vec<Event>)> {
    let feed: AtomFeed = from_str(xml).context("parsing atom xml")?;
    let feed_title = feed.title.map(|t| clean_text(&t.value, 256));

    let mut out = Vec::with_capacity(feed.entry.len());
    for entry in feed.entry {
        let title = clean_text(
            entry.title.as_ref().map(|t| t.value.as_str()).unwrap_or_default(),
            256,
        );
        let mut page = None;
        let mut enclosure = None;
        for link in entry.link {
            match link.rel.as_deref() {
                None | Some("alternate") if page.is_none() => page = Some(link.href),
                Some("enclosure") if enclosure.is_none() => enclosure = Some(link.href),
                _ => {}
            }
        }
        let id = entry
            .id
            .map(|i| i.trim().to_string())
            .filter(|i| !i.is_empty())
            .or_else(|| page.clone())
            .unwrap_or_else(|| title.clone());
        if id.is_empty() {
            continue;
        }

        let body = clean_text(
            entry.summary.as_ref().map(|t| t.value.as_str()).unwrap_or_default(),
            2000,
        );
        let kind = match enclosure {
            Some(url) => EventKind::Media {
                body,
                video_link: Some(url),
            },
            None => EventKind::Post {
                body,
                translation: None,
                photos: Vec::new(),
            },
        };

        let mut ev = Event::new(id, title, kind);
        ev.url = page;
        ev.author = feed_title.clone();
        ev.published_at = entry
            .published
            .as_deref()
            .or(entry.updated.as_deref())
            .and_then(parse_rfc3339);
        out.push(ev);
    }
    Ok((feed_title, out))
}

/// Feeds list newest first. Sort by date when every item has one,
/// otherwise trust the (reversed) document order.
fn oldest_first(mut events: Vec<Event>) -> Vec<Event> {
    events.reverse();
    if events.iter().all(|e| e.published_at.is_some()) {
        events.sort_by_key(|e| e.published_at);
    }
    events
}

pub struct RssFetcher {
    client: Client,
}

impl RssFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn download(&self, url: &str) -> Result<(Option<String>, Vec<Event>), FetchError> {
        let resp = self.client.get(url).send().await.map_err(|e| {
            if e.is_builder() {
                FetchError::NotFound(url.to_string())
            } else {
                FetchError::from(e)
            }
        })?;
        let status = resp.status();
        if status == StatusCode::GONE {
            return Err(FetchError::NotFound(url.to_string()));
        }
        if !status.is_success() {
            return Err(FetchError::from_status(PROVIDER, url, status, status.to_string()));
        }
        let body = resp.text().await?;
        parse_feed(&body).map_err(|e| FetchError::Malformed(format!("{e:#}")))
    }
}

#[async_trait]
impl Fetcher for RssFetcher {
    fn name(&self) -> &'static str {
        PROVIDER
    }

    async fn fetch(&self, url: &str) -> Result<Vec<Event>, FetchError> {
        Ok(self.download(url).await?.1)
    }

    async fn resolve(&self, query: &str) -> Result<Resolved, FetchError> {
        let url = query.trim();
        let url = if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("https://{url}")
        };
        let (title, _) = self.download(&url).await?;
        Ok(Resolved { id: url, label: title })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0"?>
<rss version="2.0"><channel>
  <title>Dev &amp; Blog</title>
  <item>
    <title>Second post</title>
    <link>https://blog.example.com/2</link>
    <guid isPermaLink="false">post-2</guid>
    <pubDate>Tue, 02 Jan 2024 10:00:00 GMT</pubDate>
    <description>&lt;p&gt;Hello&nbsp;again&lt;/p&gt;</description>
  </item>
  <item>
    <title>Episode 1</title>
    <link>https://blog.example.com/1</link>
    <pubDate>Mon, 01 Jan 2024 10:00:00 GMT</pubDate>
    <enclosure url="https://cdn.example.com/ep1.mp3" length="1" type="audio/mpeg"/>
  </item>
</channel></rss>"#;

    #[test]
    fn items_become_events_oldest_first() {
        let (title, evs) = parse_feed(FEED).unwrap();
        assert_eq!(title.as_deref(), Some("Dev & Blog"));
        assert_eq!(evs.len(), 2);

        assert_eq!(evs[0].id, "https://blog.example.com/1");
        assert!(matches!(
            &evs[0].kind,
            EventKind::Media { video_link: Some(l), .. } if l == "https://cdn.example.com/ep1.mp3"
        ));

        assert_eq!(evs[1].id, "post-2");
        assert_eq!(evs[1].title, "Second post");
        match &evs[1].kind {
            EventKind::Post { body, .. } => assert_eq!(body, "Hello again"),
            other => panic!("unexpected kind {other:?}"),
        }
        assert!(evs[0].published_at < evs[1].published_at);
    }

    #[test]
    fn empty_channel_is_ok() {
        let (_, evs) = parse_feed("<rss><channel><title>x</title></channel></rss>").unwrap();
        assert!(evs.is_empty());
    }

    const ATOM: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<feed xmlns="http://www.w3.org/2005/Atom">
  <title type="text">Release notes</title>
  <updated>2024-03-02T09:00:00Z</updated>
  <entry>
    <title type="html">v2 &lt;b&gt;out&lt;/b&gt;</title>
    <id>tag:example.com,2024:v2</id>
    <link rel="alternate" href="https://example.com/v2"/>
    <link rel="enclosure" href="https://cdn.example.com/v2.mp4"/>
    <updated>2024-03-02T09:00:00+01:00</updated>
    <summary>Second release</summary>
  </entry>
  <entry>
    <title>v1</title>
    <link href="https://example.com/v1"/>
    <published>2024-03-01T09:00:00Z</published>
    <updated>2024-03-05T09:00:00Z</updated>
  </entry>
</feed>"#;

    #[test]
    fn atom_entries_become_events() {
        let (title, evs) = parse_feed(ATOM).unwrap();
        assert_eq!(title.as_deref(), Some("Release notes"));
        assert_eq!(evs.len(), 2);

        // No <id>: falls back to the page link; `published` wins over `updated`.
        assert_eq!(evs[0].id, "https://example.com/v1");
        assert_eq!(evs[0].url.as_deref(), Some("https://example.com/v1"));
        assert_eq!(
            evs[0].published_at,
            DateTime::parse_from_rfc3339("2024-03-01T09:00:00Z")
                .ok()
                .map(|d| d.with_timezone(&Utc))
        );

        assert_eq!(evs[1].id, "tag:example.com,2024:v2");
        assert_eq!(evs[1].title, "v2 out");
        assert_eq!(evs[1].author.as_deref(), Some("Release notes"));
        match &evs[1].kind {
            EventKind::Media { body, video_link } => {
                assert_eq!(body, "Second release");
                assert_eq!(video_link.as_deref(), Some("https://cdn.example.com/v2.mp4"));
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn single_entry_atom_feed_parses() {
        let xml = r#"<feed xmlns="http://www.w3.org/2005/Atom"><title>t</title>
            <entry><id>urn:1</id><title>one</title><updated>2024-01-01T00:00:00Z</updated></entry>
            </feed>"#;
        let (_, evs) = parse_feed(xml).unwrap();
        assert_eq!(evs.len(), 1);
        assert_eq!(evs[0].id, "urn:1");
    }

    #[test]
    fn rss_dates_may_be_rfc3339() {
        let xml = r#"<rss><channel><title>x</title>
            <item><guid>a</guid><pubDate>2024-01-02T00:00:00Z</pubDate></item>
            <item><guid>b</guid><pubDate>2024-01-01T00:00:00Z</pubDate></item>
            </channel></rss>"#;
        let (_, evs) = parse_feed(xml).unwrap();
        assert_eq!(evs[0].id, "b");
        assert!(evs[0].published_at.is_some());
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(parse_feed("not xml at all").is_err());
    }
}

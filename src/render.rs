//! # Rendering
//! Turns an [`Event`] into a destination-agnostic [`Message`]. One renderer
//! per event kind; sinks decide how a message maps onto their wire format
//! (embed, Slack text, e-mail body).

use chrono::{DateTime, Utc};
use once_cell::sync::OnceCell;
use regex::Regex;
use serde::Serialize;

use crate::fetch::clean_text;
use crate::model::{Event, EventKind};

pub const COLOR_YOUTUBE: u32 = 0xE7_4C_3C;
pub const COLOR_LIVE: u32 = 0x82_EC_F5;
pub const COLOR_COMMUNITY: u32 = 0x1E_D8_A4;
pub const COLOR_CALENDAR: u32 = 0x42_85_F4;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Field {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Mention {
    Role(String),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Message {
    pub title: String,
    pub url: Option<String>,
    pub description: String,
    pub color: Option<u32>,
    pub fields: Vec<Field>,
    pub thumbnail: Option<String>,
    pub image: Option<String>,
    pub footer: Option<String>,
    /// Plain links posted next to the message so the platform previews them
    /// (photos, video links).
    pub links: Vec<String>,
    pub mention: Option<Mention>,
}

impl Message {
    pub fn with_mention(mut self, role: Option<&str>) -> Self {
        self.mention = role.filter(|r| !r.is_empty()).map(|r| Mention::Role(r.to_string()));
        self
    }

    fn field(mut self, name: &str, value: impl Into<String>) -> Self {
        self.fields.push(Field {
            name: name.to_string(),
            value: value.into(),
            inline: true,
        });
        self
    }
}

/// Render `event` of a source displayed as `source_label`.
pub fn render(event: &Event, source_label: &str, now: DateTime<Utc>) -> Message {
    match &event.kind {
        EventKind::Video {
            live,
            description,
            views,
            likes,
            subscribers,
            image,
        } => render_video(event, *live, description, *views, *likes, subscribers.as_deref(), image.clone()),
        EventKind::Post {
            body,
            translation,
            photos,
        } => {
            let mut msg = community(event, source_label, body, translation.as_deref());
            msg.links = photos.clone();
            msg
        }
        EventKind::Media { body, video_link } => {
            let mut msg = community(event, source_label, body, None);
            msg.links = video_link.iter().cloned().collect();
            msg
        }
        EventKind::Comment { body, translation } => {
            community(event, source_label, body, translation.as_deref())
        }
        EventKind::Announcement { body } => Message {
            title: format!("New {source_label} Announcement!"),
            url: event.url.clone(),
            description: format!("**{}**\n\n{}", event.title, body),
            color: Some(COLOR_COMMUNITY),
            thumbnail: event.thumbnail.clone(),
            ..Message::default()
        },
        EventKind::Scheduled {
            starts_at,
            description,
        } => {
            let secs = starts_at.signed_duration_since(now).num_seconds();
            let footer = if secs > 0 {
                format!("In {} from now.", humanize_delta(secs))
            } else {
                "Starting now.".to_string()
            };
            Message {
                title: event.title.clone(),
                url: event.url.clone(),
                description: clean_text(&discordify_format(description), 2000),
                color: Some(COLOR_CALENDAR),
                footer: Some(footer),
                ..Message::default()
            }
        }
    }
}

fn render_video(
    event: &Event,
    live: bool,
    description: &str,
    views: Option<u64>,
    likes: Option<u64>,
    subscribers: Option<&str>,
    image: Option<String>,
) -> Message {
    let author = event.author.as_deref().unwrap_or("Unknown channel");
    let (title, color) = if live {
        (format!("{author} Now Live: {}", event.title), COLOR_LIVE)
    } else {
        (format!("New Video: {}", event.title), COLOR_YOUTUBE)
    };

    let mut msg = Message {
        title,
        url: event.url.clone(),
        description: description.to_string(),
        color: Some(color),
        thumbnail: event.thumbnail.clone(),
        image,
        footer: event.published_at.map(|ts| {
            // author must not reach the strftime pattern
            format!(
                "Posted by {author} at {}",
                ts.format("%H:%M:%S UTC on %A %B %d, %Y")
            )
        }),
        ..Message::default()
    };
    if let Some(v) = views {
        msg = msg.field("Views", group_thousands(v));
    }
    if let Some(l) = likes {
        msg = msg.field("Likes", group_thousands(l));
    }
    if let Some(s) = subscribers {
        let s = s.parse::<u64>().map(group_thousands).unwrap_or_else(|_| s.to_string());
        msg = msg.field("Subscribers", s);
    }
    msg
}

fn community(event: &Event, source_label: &str, body: &str, translation: Option<&str>) -> Message {
    let mut description = format!("**{}**\n\nContent: **{}**", event.title, body);
    if let Some(t) = translation.filter(|t| !t.is_empty() && *t != body) {
        description.push_str(&format!("\nTranslated Content: **{t}**"));
    }
    Message {
        title: format!("New {source_label} Notification!"),
        url: event.url.clone(),
        description,
        color: Some(COLOR_COMMUNITY),
        thumbnail: event.thumbnail.clone(),
        ..Message::default()
    }
}

/// `1234567` → `1,234,567`.
pub fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

/// Escape markdown and turn basic HTML emphasis into markdown.
pub fn discordify_format(desc: &str) -> String {
    static RULES: OnceCell<Vec<(Regex, &'static str)>> = OnceCell::new();
    let rules = RULES.get_or_init(|| {
        [
            (r"\*", r"\*"),
            (r"_", r"\_"),
            (r"(?i)</?(?:b|strong)>", "**"),
            (r"(?i)</?(?:i|em)>", "*"),
            (r"(?i)</?(?:u|ul)>", "__"),
        ]
        .into_iter()
        .map(|(re, rep)| (Regex::new(re).expect("valid regex"), rep))
        .collect()
    });
    let mut out = desc.to_string();
    for (re, rep) in rules {
        out = re.replace_all(&out, regex::NoExpand(rep)).to_string();
    }
    out
}

/// `90061` → `1 day, 1 hour, 1 minute, 1 second`.
pub fn humanize_delta(total_seconds: i64) -> String {
    let total = total_seconds.max(0);
    let (y, rest) = (total / (365 * 86_400), total % (365 * 86_400));
    let (d, rest) = (rest / 86_400, rest % 86_400);
    let (h, rest) = (rest / 3_600, rest % 3_600);
    let (m, s) = (rest / 60, rest % 60);

    let parts: Vec<String> = [(y, "year"), (d, "day"), (h, "hour"), (m, "minute"), (s, "second")]
        .into_iter()
        .filter(|(n, _)| *n > 0)
        .map(|(n, unit)| format!("{n} {unit}{}", if n > 1 { "s" } else { "" }))
        .collect();
    if parts.is_empty() {
        "0 seconds".to_string()
    } else {
        parts.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn video_renders_stats_and_footer() {
        let mut ev = Event::new(
            "vid",
            "Launch",
            EventKind::Video {
                live: false,
                description: "desc".into(),
                views: Some(1_234_567),
                likes: None,
                subscribers: Some("hidden".into()),
                image: Some("https://img".into()),
            },
        );
        ev.author = Some("Chan".into());
        ev.published_at = Some(now());
        let msg = render(&ev, "youtube:UC", now());

        assert_eq!(msg.title, "New Video: Launch");
        assert_eq!(msg.color, Some(COLOR_YOUTUBE));
        assert_eq!(msg.fields[0].value, "1,234,567");
        assert_eq!(msg.fields[1].name, "Subscribers");
        assert_eq!(msg.fields[1].value, "hidden");
        assert_eq!(
            msg.footer.as_deref(),
            Some("Posted by Chan at 12:00:00 UTC on Sunday June 01, 2025")
        );
    }

    #[test]
    fn live_video_uses_live_title() {
        let mut ev = Event::new(
            "v",
            "Q&A",
            EventKind::Video {
                live: true,
                description: String::new(),
                views: None,
                likes: None,
                subscribers: None,
                image: None,
            },
        );
        ev.author = Some("Chan".into());
        let msg = render(&ev, "x", now());
        assert_eq!(msg.title, "Chan Now Live: Q&A");
        assert_eq!(msg.color, Some(COLOR_LIVE));
    }

    #[test]
    fn post_carries_photos_as_links_and_translation() {
        let ev = Event::new(
            "p1",
            "Artist posted",
            EventKind::Post {
                body: "안녕".into(),
                translation: Some("Hello".into()),
                photos: vec!["https://p/1.jpg".into(), "https://p/2.jpg".into()],
            },
        );
        let msg = render(&ev, "group", now());
        assert_eq!(msg.title, "New group Notification!");
        assert!(msg.description.contains("Content: **안녕**"));
        assert!(msg.description.contains("Translated Content: **Hello**"));
        assert_eq!(msg.links.len(), 2);
    }

    #[test]
    fn scheduled_footer_counts_down() {
        let ev = Event::new(
            "c1",
            "Raid",
            EventKind::Scheduled {
                starts_at: now() + Duration::seconds(90_061),
                description: "<b>Bring</b> snacks_and potions".into(),
            },
        );
        let msg = render(&ev, "cal", now());
        assert_eq!(msg.footer.as_deref(), Some("In 1 day, 1 hour, 1 minute, 1 second from now."));
        assert_eq!(msg.description, r"**Bring** snacks\_and potions");
    }

    #[test]
    fn mention_is_attached_per_subscription() {
        let msg = render(&Event::announcement("a", "b"), "x", now());
        assert_eq!(msg.clone().with_mention(Some("42")).mention, Some(Mention::Role("42".into())));
        assert_eq!(msg.with_mention(None).mention, None);
    }

    #[test]
    fn helpers() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1000), "1,000");
        assert_eq!(humanize_delta(0), "0 seconds");
        assert_eq!(humanize_delta(7_200), "2 hours");
    }
}

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use std::time::Duration;

use super::Sink;
use crate::error::DeliveryError;
use crate::render::{Message, Mention};

const TITLE_MAX: usize = 256;
const DESCRIPTION_MAX: usize = 4096;
const CONTENT_MAX: usize = 2000;

/// Posts an embed to a Discord channel webhook.
#[derive(Clone)]
pub struct DiscordWebhook {
    webhook: String,
    client: Client,
    timeout: Duration,
    max_retries: u8,
    backoff_base: Duration,
}

impl DiscordWebhook {
    pub fn new(webhook: String, client: Client) -> Self {
        Self {
            webhook,
            client,
            timeout: Duration::from_secs(5),
            max_retries: 3,
            backoff_base: Duration::from_millis(500),
        }
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout = Duration::from_secs(secs);
        self
    }

    async fn post(&self, payload: &WebhookPayload) -> Result<(), DeliveryError> {
        let mut attempt: u8 = 0;
        loop {
            attempt += 1;
            let res = self
                .client
                .post(&self.webhook)
                .timeout(self.timeout)
                .json(payload)
                .send()
                .await;

            let retryable = match res {
                Ok(rsp) => {
                    let status = rsp.status();
                    if status.is_success() {
                        return Ok(());
                    }
                    match status {
                        StatusCode::FORBIDDEN => {
                            return Err(DeliveryError::Forbidden(self.redacted()))
                        }
                        StatusCode::NOT_FOUND => {
                            return Err(DeliveryError::NotFound(self.redacted()))
                        }
                        s if s.is_server_error() || s == StatusCode::TOO_MANY_REQUESTS => {
                            format!("discord webhook HTTP {s}")
                        }
                        s => {
                            return Err(DeliveryError::Transport(format!(
                                "discord webhook HTTP {s}"
                            )))
                        }
                    }
                }
                Err(e) => format!("discord webhook request failed: {e}"),
            };

            if attempt >= self.max_retries {
                return Err(DeliveryError::Transport(retryable));
            }
            tracing::debug!(attempt, error = %retryable, "retrying discord webhook");
            tokio::time::sleep(backoff_delay(self.backoff_base, attempt)).await;
        }
    }

    /// Webhook URLs embed their token; never log them whole.
    fn redacted(&self) -> String {
        match self.webhook.rsplit_once('/') {
            Some((head, _)) => format!("{head}/***"),
            None => "***".to_string(),
        }
    }
}

/// `base * 2^(attempt - 1)`, saturating.
fn backoff_delay(base: Duration, attempt: u8) -> Duration {
    let factor = 1u32
        .checked_shl(u32::from(attempt.saturating_sub(1)))
        .unwrap_or(u32::MAX);
    base.saturating_mul(factor)
}

#[async_trait]
impl Sink for DiscordWebhook {
    fn kind(&self) -> &'static str {
        "discord_webhook"
    }

    async fn send(&self, message: &Message) -> Result<(), DeliveryError> {
        self.post(&WebhookPayload::from_message(message)).await?;
        if let Some(follow_up) = WebhookPayload::links(&message.links) {
            self.post(&follow_up).await?;
        }
        Ok(())
    }
}

#[derive(Serialize, Debug)]
struct UrlRef {
    url: String,
}

#[derive(Serialize, Debug)]
struct Footer {
    text: String,
}

#[derive(Serialize, Debug)]
struct EmbedField {
    name: String,
    value: String,
    inline: bool,
}

#[derive(Serialize, Debug)]
struct Embed {
    title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    color: Option<u32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    fields: Vec<EmbedField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    thumbnail: Option<UrlRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    image: Option<UrlRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    footer: Option<Footer>,
}

#[derive(Serialize, Debug, Default)]
struct AllowedMentions {
    parse: Vec<String>,
    roles: Vec<String>,
}

#[derive(Serialize, Debug)]
struct WebhookPayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    embeds: Vec<Embed>,
    allowed_mentions: AllowedMentions,
}

fn cut(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

impl WebhookPayload {
    fn from_message(m: &Message) -> Self {
        // Only the subscribed role may be pinged.
        let (content, allowed_mentions) = match &m.mention {
            Some(Mention::Role(id)) => (
                Some(format!("<@&{id}>")),
                AllowedMentions {
                    parse: Vec::new(),
                    roles: vec![id.clone()],
                },
            ),
            None => (None, AllowedMentions::default()),
        };
        Self {
            content,
            embeds: vec![Embed {
                title: cut(&m.title, TITLE_MAX),
                url: m.url.clone(),
                description: cut(&m.description, DESCRIPTION_MAX),
                color: m.color,
                fields: m
                    .fields
                    .iter()
                    .map(|f| EmbedField {
                        name: f.name.clone(),
                        value: f.value.clone(),
                        inline: f.inline,
                    })
                    .collect(),
                thumbnail: m.thumbnail.clone().map(|url| UrlRef { url }),
                image: m.image.clone().map(|url| UrlRef { url }),
                footer: m.footer.clone().map(|text| Footer { text }),
            }],
            allowed_mentions,
        }
    }

    fn links(links: &[String]) -> Option<Self> {
        if links.is_empty() {
            return None;
        }
        Some(Self {
            content: Some(cut(&links.join("\n"), CONTENT_MAX)),
            embeds: Vec::new(),
            allowed_mentions: AllowedMentions::default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::Field;

    #[test]
    fn backoff_doubles_and_saturates() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 1), base);
        assert_eq!(backoff_delay(base, 2), Duration::from_secs(1));
        assert_eq!(backoff_delay(base, 3), Duration::from_secs(2));
        // Far past 32 doublings: no overflow panic.
        assert_eq!(backoff_delay(base, 40), base.saturating_mul(u32::MAX));
        assert_eq!(backoff_delay(base, u8::MAX), base.saturating_mul(u32::MAX));
        assert_eq!(backoff_delay(base, 0), base);
    }

    #[test]
    fn embed_payload_restricts_mentions_to_the_role() {
        let msg = Message {
            title: "New Video: x".into(),
            description: "d".into(),
            color: Some(0xFF0000),
            fields: vec![Field {
                name: "Views".into(),
                value: "1".into(),
                inline: true,
            }],
            thumbnail: Some("https://t".into()),
            mention: Some(Mention::Role("42".into())),
            ..Message::default()
        };
        let json = serde_json::to_value(WebhookPayload::from_message(&msg)).unwrap();
        assert_eq!(json["content"], "<@&42>");
        assert_eq!(json["allowed_mentions"]["roles"][0], "42");
        assert_eq!(json["allowed_mentions"]["parse"].as_array().unwrap().len(), 0);
        assert_eq!(json["embeds"][0]["thumbnail"]["url"], "https://t");
        assert_eq!(json["embeds"][0]["fields"][0]["name"], "Views");
        assert!(json["embeds"][0].get("image").is_none());
    }

    #[test]
    fn links_go_in_a_separate_payload() {
        assert!(WebhookPayload::links(&[]).is_none());
        let p = WebhookPayload::links(&["a".into(), "b".into()]).unwrap();
        assert_eq!(p.content.as_deref(), Some("a\nb"));
        assert!(p.embeds.is_empty());
    }

    #[test]
    fn webhook_token_is_redacted() {
        let w = DiscordWebhook::new(
            "https://discord.com/api/webhooks/1/secret".into(),
            Client::new(),
        );
        assert_eq!(w.redacted(), "https://discord.com/api/webhooks/1/***");
    }
}

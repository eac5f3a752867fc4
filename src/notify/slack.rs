use async_trait::async_trait;
use reqwest::Client;

use super::Sink;
use crate::error::DeliveryError;
use crate::render::{Message, Mention};

pub struct SlackWebhook {
    webhook_url: String,
    client: Client,
}

impl SlackWebhook {
    pub fn new(url: String, client: Client) -> Self {
        Self {
            webhook_url: url,
            client,
        }
    }
}

/// Slack mrkdwn text for a message. Slack has no role mentions; the group
/// handle is passed through as `<!subteam^id>`.
pub fn slack_text(m: &Message) -> String {
    let mut out = String::new();
    if let Some(Mention::Role(id)) = &m.mention {
        out.push_str(&format!("<!subteam^{id}> "));
    }
    match &m.url {
        Some(url) => out.push_str(&format!("*<{url}|{}>*", m.title)),
        None => out.push_str(&format!("*{}*", m.title)),
    }
    if !m.description.is_empty() {
        out.push('\n');
        out.push_str(&m.description.replace("**", "*"));
    }
    for f in &m.fields {
        out.push_str(&format!("\n{}: {}", f.name, f.value));
    }
    if let Some(footer) = &m.footer {
        out.push_str(&format!("\n_{footer}_"));
    }
    for link in &m.links {
        out.push('\n');
        out.push_str(link);
    }
    out
}

#[async_trait]
impl Sink for SlackWebhook {
    fn kind(&self) -> &'static str {
        "slack_webhook"
    }

    async fn send(&self, message: &Message) -> Result<(), DeliveryError> {
        let body = serde_json::json!({ "text": slack_text(message) });

        let rsp = self
            .client
            .post(&self.webhook_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| DeliveryError::Transport(format!("slack post: {e}")))?;
        match rsp.status().as_u16() {
            200..=299 => Ok(()),
            403 => Err(DeliveryError::Forbidden("slack webhook".into())),
            404 | 410 => Err(DeliveryError::NotFound("slack webhook".into())),
            s => Err(DeliveryError::Transport(format!("slack non-2xx: {s}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_has_link_title_and_bold_converted() {
        let m = Message {
            title: "New Video: x".into(),
            url: Some("https://y/v".into()),
            description: "**bold** text".into(),
            footer: Some("Posted".into()),
            links: vec!["https://p/1.jpg".into()],
            ..Message::default()
        };
        assert_eq!(
            slack_text(&m),
            "*<https://y/v|New Video: x>*\n*bold* text\n_Posted_\nhttps://p/1.jpg"
        );
    }
}

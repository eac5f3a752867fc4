use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::message::{header, Mailbox, Message as Email};
use lettre::transport::smtp::{authentication::Credentials, AsyncSmtpTransport};
use lettre::{AsyncTransport, Tokio1Executor};

use super::Sink;
use crate::config::SmtpConfig;
use crate::error::DeliveryError;
use crate::render::Message;

/// Shared SMTP relay; one per process, used by every e-mail destination.
pub struct Mailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl Mailer {
    pub fn from_config(smtp: &SmtpConfig) -> Result<Self> {
        let creds = Credentials::new(smtp.user.clone(), smtp.pass.clone());
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::relay(&smtp.host)
            .with_context(|| format!("invalid smtp host {}", smtp.host))?
            .credentials(creds);
        if let Some(port) = smtp.port {
            builder = builder.port(port);
        }
        let from = smtp
            .from
            .parse()
            .with_context(|| format!("invalid smtp from address {}", smtp.from))?;
        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

pub struct EmailSink {
    mailer: Arc<Mailer>,
    to: Mailbox,
}

impl EmailSink {
    pub fn new(mailer: Arc<Mailer>, to: &str) -> Result<Self> {
        let to = to
            .parse()
            .with_context(|| format!("invalid e-mail address {to}"))?;
        Ok(Self { mailer, to })
    }
}

/// Plain-text body: description, fields, footer, then links.
pub fn email_body(m: &Message) -> String {
    let mut body = String::new();
    if let Some(url) = &m.url {
        body.push_str(url);
        body.push_str("\n\n");
    }
    body.push_str(&m.description.replace("**", ""));
    body.push('\n');
    for f in &m.fields {
        body.push_str(&format!("{}: {}\n", f.name, f.value));
    }
    if let Some(footer) = &m.footer {
        body.push_str(&format!("\n{footer}\n"));
    }
    for link in &m.links {
        body.push_str(&format!("{link}\n"));
    }
    body
}

#[async_trait]
impl Sink for EmailSink {
    fn kind(&self) -> &'static str {
        "email"
    }

    async fn send(&self, message: &Message) -> Result<(), DeliveryError> {
        let msg = Email::builder()
            .from(self.mailer.from.clone())
            .to(self.to.clone())
            .subject(message.title.clone())
            .header(header::ContentType::TEXT_PLAIN)
            .body(email_body(message))
            .map_err(|e| DeliveryError::Transport(format!("build email: {e}")))?;

        self.mailer
            .transport
            .send(msg)
            .await
            .map_err(|e| DeliveryError::Transport(format!("send email: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::Field;

    #[test]
    fn body_lists_fields_and_links() {
        let m = Message {
            title: "t".into(),
            url: Some("https://x".into()),
            description: "**Hi**".into(),
            fields: vec![Field {
                name: "Views".into(),
                value: "10".into(),
                inline: true,
            }],
            links: vec!["https://p".into()],
            ..Message::default()
        };
        assert_eq!(email_body(&m), "https://x\n\nHi\nViews: 10\nhttps://p\n");
    }
}

//! # Notify
//! Delivery of rendered [`Message`]s to destinations.
//!
//! The engine only sees the [`Outbox`] trait. In production that is a
//! [`DestinationRouter`] mapping destination ids to configured sinks
//! (Discord/Slack webhooks, e-mail, log); tests use [`memory::MemoryOutbox`].

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::Client;

use crate::config::{AppConfig, DestinationConfig};
use crate::error::DeliveryError;
use crate::render::{Message, Mention};

pub mod discord;
pub mod email;
pub mod memory;
pub mod slack;

#[async_trait]
pub trait Outbox: Send + Sync {
    async fn deliver(&self, destination: &str, message: &Message) -> Result<(), DeliveryError>;
}

/// One configured endpoint. A destination id maps to exactly one sink.
#[async_trait]
pub trait Sink: Send + Sync {
    fn kind(&self) -> &'static str;
    async fn send(&self, message: &Message) -> Result<(), DeliveryError>;
}

/// Writes messages to the log instead of sending them anywhere.
pub struct LogSink {
    destination: String,
}

impl LogSink {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
        }
    }
}

#[async_trait]
impl Sink for LogSink {
    fn kind(&self) -> &'static str {
        "log"
    }

    async fn send(&self, message: &Message) -> Result<(), DeliveryError> {
        let mention = match &message.mention {
            Some(Mention::Role(r)) => r.as_str(),
            None => "",
        };
        tracing::info!(
            destination = %self.destination,
            title = %message.title,
            url = message.url.as_deref().unwrap_or(""),
            mention,
            links = message.links.len(),
            "notification"
        );
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct DestinationRouter {
    sinks: HashMap<String, Arc<dyn Sink>>,
}

impl DestinationRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink(mut self, destination: impl Into<String>, sink: Arc<dyn Sink>) -> Self {
        self.sinks.insert(destination.into(), sink);
        self
    }

    pub fn destinations(&self) -> impl Iterator<Item = &str> {
        self.sinks.keys().map(String::as_str)
    }

    pub fn contains(&self, destination: &str) -> bool {
        self.sinks.contains_key(destination)
    }

    /// Build every sink named in `[destinations]`.
    pub fn from_config(cfg: &AppConfig, client: Client) -> anyhow::Result<Self> {
        let mut router = Self::new();
        let mut mailer: Option<Arc<email::Mailer>> = None;

        for (id, dest) in &cfg.destinations {
            let sink: Arc<dyn Sink> = match dest {
                DestinationConfig::DiscordWebhook { url } => Arc::new(
                    discord::DiscordWebhook::new(url.clone(), client.clone())
                        .with_timeout(cfg.http_timeout_secs),
                ),
                DestinationConfig::SlackWebhook { url } => {
                    Arc::new(slack::SlackWebhook::new(url.clone(), client.clone()))
                }
                DestinationConfig::Email { to } => {
                    let mailer = match &mailer {
                        Some(m) => m.clone(),
                        None => {
                            let smtp = cfg.smtp.as_ref().with_context(|| {
                                format!("destination {id} is e-mail but [smtp] is not configured")
                            })?;
                            let m = Arc::new(email::Mailer::from_config(smtp)?);
                            mailer = Some(m.clone());
                            m
                        }
                    };
                    Arc::new(
                        email::EmailSink::new(mailer, to)
                            .with_context(|| format!("destination {id}"))?,
                    )
                }
                DestinationConfig::Log => Arc::new(LogSink::new(id.clone())),
            };
            tracing::debug!(destination = %id, kind = sink.kind(), "destination configured");
            router.sinks.insert(id.clone(), sink);
        }
        Ok(router)
    }
}

#[async_trait]
impl Outbox for DestinationRouter {
    async fn deliver(&self, destination: &str, message: &Message) -> Result<(), DeliveryError> {
        let sink = self
            .sinks
            .get(destination)
            .ok_or_else(|| DeliveryError::UnknownDestination(destination.to_string()))?;
        sink.send(message).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_destination_is_reported() {
        let router = DestinationRouter::new().with_sink("ops", Arc::new(LogSink::new("ops")));
        let msg = Message {
            title: "t".into(),
            ..Message::default()
        };
        assert!(router.deliver("ops", &msg).await.is_ok());
        assert!(matches!(
            router.deliver("nowhere", &msg).await,
            Err(DeliveryError::UnknownDestination(d)) if d == "nowhere"
        ));
    }

    #[test]
    fn builds_from_config() {
        let mut cfg = AppConfig::default();
        cfg.destinations
            .insert("ops".into(), DestinationConfig::Log);
        cfg.destinations.insert(
            "chat".into(),
            DestinationConfig::DiscordWebhook {
                url: "https://discord.invalid/api/webhooks/1/x".into(),
            },
        );
        let router = DestinationRouter::from_config(&cfg, Client::new()).unwrap();
        assert!(router.contains("ops"));
        assert!(router.contains("chat"));
        assert!(!router.contains("mail"));
    }

    #[test]
    fn email_without_smtp_is_rejected() {
        let mut cfg = AppConfig::default();
        cfg.destinations.insert(
            "mail".into(),
            DestinationConfig::Email {
                to: "ops@example.com".into(),
            },
        );
        assert!(DestinationRouter::from_config(&cfg, Client::new()).is_err());
    }
}

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;

use super::Outbox;
use crate::error::DeliveryError;
use crate::render::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    Forbidden,
    NotFound,
    Transport,
}

/// Records every delivery instead of sending it. Destinations can be told to
/// fail.
#[derive(Default)]
pub struct MemoryOutbox {
    delivered: Mutex<Vec<(String, Message)>>,
    failing: Mutex<HashMap<String, Failure>>,
    attempts: Mutex<HashSet<String>>,
}

impl MemoryOutbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, destination: &str, failure: Failure) {
        self.failing
            .lock()
            .expect("memory outbox mutex poisoned")
            .insert(destination.to_string(), failure);
    }

    pub fn heal(&self, destination: &str) {
        self.failing
            .lock()
            .expect("memory outbox mutex poisoned")
            .remove(destination);
    }

    /// Successful deliveries in order.
    pub fn delivered(&self) -> Vec<(String, Message)> {
        self.delivered
            .lock()
            .expect("memory outbox mutex poisoned")
            .clone()
    }

    pub fn delivered_to(&self, destination: &str) -> Vec<Message> {
        self.delivered()
            .into_iter()
            .filter(|(d, _)| d == destination)
            .map(|(_, m)| m)
            .collect()
    }

    /// Destinations a delivery was attempted for, failed or not.
    pub fn attempted(&self, destination: &str) -> bool {
        self.attempts
            .lock()
            .expect("memory outbox mutex poisoned")
            .contains(destination)
    }

    pub fn clear(&self) {
        self.delivered
            .lock()
            .expect("memory outbox mutex poisoned")
            .clear();
    }
}

#[async_trait]
impl Outbox for MemoryOutbox {
    async fn deliver(&self, destination: &str, message: &Message) -> Result<(), DeliveryError> {
        self.attempts
            .lock()
            .expect("memory outbox mutex poisoned")
            .insert(destination.to_string());

        let failure = self
            .failing
            .lock()
            .expect("memory outbox mutex poisoned")
            .get(destination)
            .copied();
        match failure {
            Some(Failure::Forbidden) => Err(DeliveryError::Forbidden(destination.to_string())),
            Some(Failure::NotFound) => Err(DeliveryError::NotFound(destination.to_string())),
            Some(Failure::Transport) => {
                Err(DeliveryError::Transport(format!("{destination}: injected failure")))
            }
            None => {
                self.delivered
                    .lock()
                    .expect("memory outbox mutex poisoned")
                    .push((destination.to_string(), message.clone()));
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_and_injects_failures() {
        let out = MemoryOutbox::new();
        let msg = Message::default();
        out.deliver("a", &msg).await.unwrap();
        out.fail("b", Failure::Forbidden);
        assert!(matches!(
            out.deliver("b", &msg).await,
            Err(DeliveryError::Forbidden(_))
        ));
        assert!(out.attempted("b"));
        assert_eq!(out.delivered().len(), 1);

        out.heal("b");
        out.deliver("b", &msg).await.unwrap();
        assert_eq!(out.delivered_to("b").len(), 1);
    }
}

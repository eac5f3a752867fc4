// src/fetch/types.rs
use async_trait::async_trait;

use crate::error::FetchError;
use crate::model::Event;

/// Canonical id (and display name, when the upstream has one) for what a
/// user typed into `add`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    pub id: String,
    pub label: Option<String>,
}

impl Resolved {
    pub fn id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            label: None,
        }
    }
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Current events of `source_id`, oldest first.
    async fn fetch(&self, source_id: &str) -> Result<Vec<Event>, FetchError>;

    /// Turn user input into a canonical source id.
    async fn resolve(&self, query: &str) -> Result<Resolved, FetchError> {
        Ok(Resolved::id(query.trim()))
    }

    /// Add details only worth fetching for events about to be announced.
    /// Must not fail the event; implementations log and return it as-is.
    async fn enrich(&self, _source_id: &str, event: Event) -> Event {
        event
    }
}

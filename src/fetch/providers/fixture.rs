// src/fetch/providers/fixture.rs
use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::FetchError;
use crate::fetch::types::Fetcher;
use crate::model::Event;

#[derive(Debug, Clone)]
enum Scripted {
    Events(Vec<Event>),
    NotFound,
    Transient(String),
}

/// Events kept per source; older ones fall off as new ones are pushed.
pub const DEFAULT_FEED_CAPACITY: usize = 50;

/// In-memory source whose contents are set from the outside: host-fed
/// community feeds, demos and tests. Unknown sources are empty.
pub struct StaticFetcher {
    name: &'static str,
    capacity: usize,
    sources: Mutex<HashMap<String, Scripted>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl StaticFetcher {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            capacity: DEFAULT_FEED_CAPACITY,
            sources: Mutex::new(HashMap::new()),
            calls: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    fn script(&self, source: &str, s: Scripted) {
        self.sources
            .lock()
            .expect("static fetcher mutex poisoned")
            .insert(source.to_string(), s);
    }

    /// Replace the feed of `source`. Only the newest `capacity` events stay.
    pub fn set_events(&self, source: &str, mut events: Vec<Event>) {
        trim_front(&mut events, self.capacity);
        self.script(source, Scripted::Events(events));
    }

    /// Append one event to the feed of `source` (clears a scripted error).
    /// The oldest event is dropped once the feed is full.
    pub fn push_event(&self, source: &str, event: Event) {
        let mut map = self.sources.lock().expect("static fetcher mutex poisoned");
        match map.get_mut(source) {
            Some(Scripted::Events(v)) => {
                v.push(event);
                trim_front(v, self.capacity);
            }
            _ => {
                map.insert(source.to_string(), Scripted::Events(vec![event]));
            }
        }
    }

    pub fn fail_not_found(&self, source: &str) {
        self.script(source, Scripted::NotFound);
    }

    pub fn fail_transient(&self, source: &str, msg: &str) {
        self.script(source, Scripted::Transient(msg.to_string()));
    }

    /// How many times `fetch` ran for `source`.
    pub fn calls(&self, source: &str) -> usize {
        self.calls
            .lock()
            .expect("static fetcher mutex poisoned")
            .get(source)
            .copied()
            .unwrap_or(0)
    }
}

#[async_trait]
impl Fetcher for StaticFetcher {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn fetch(&self, source_id: &str) -> Result<Vec<Event>, FetchError> {
        *self
            .calls
            .lock()
            .expect("static fetcher mutex poisoned")
            .entry(source_id.to_string())
            .or_default() += 1;

        let scripted = self
            .sources
            .lock()
            .expect("static fetcher mutex poisoned")
            .get(source_id)
            .cloned();
        match scripted {
            None => Ok(Vec::new()),
            Some(Scripted::Events(v)) => Ok(v),
            Some(Scripted::NotFound) => Err(FetchError::NotFound(source_id.to_string())),
            Some(Scripted::Transient(msg)) => Err(FetchError::Transient(msg)),
        }
    }
}

fn trim_front(events: &mut Vec<Event>, capacity: usize) {
    if events.len() > capacity {
        events.drain(..events.len() - capacity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scripted_results_are_returned() {
        let f = StaticFetcher::new("test");
        assert!(f.fetch("x").await.unwrap().is_empty());

        f.push_event("x", Event::announcement("e1", "a"));
        f.push_event("x", Event::announcement("e2", "b"));
        assert_eq!(f.fetch("x").await.unwrap().len(), 2);

        f.fail_not_found("x");
        assert!(f.fetch("x").await.unwrap_err().is_not_found());
        assert_eq!(f.calls("x"), 3);
    }

    #[tokio::test]
    async fn feed_keeps_only_the_newest_events() {
        let f = StaticFetcher::new("test").with_capacity(3);
        for i in 0..1000 {
            f.push_event("x", Event::announcement(format!("e{i}"), "a"));
        }
        let ids: Vec<String> = f.fetch("x").await.unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["e997", "e998", "e999"]);

        let f = StaticFetcher::new("test");
        for i in 0..(DEFAULT_FEED_CAPACITY + 10) {
            f.push_event("y", Event::announcement(format!("e{i}"), "a"));
        }
        assert_eq!(f.fetch("y").await.unwrap().len(), DEFAULT_FEED_CAPACITY);

        f.set_events("z", (0..5).map(|i| Event::announcement(format!("z{i}"), "a")).collect());
        let f = f.with_capacity(2);
        f.set_events("z", (0..5).map(|i| Event::announcement(format!("z{i}"), "a")).collect());
        let ids: Vec<String> = f.fetch("z").await.unwrap().into_iter().map(|e| e.id).collect();
        assert_eq!(ids, vec!["z3", "z4"]);
    }
}

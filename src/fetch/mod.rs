// src/fetch/mod.rs
pub mod google;
pub mod providers;
pub mod types;

use std::collections::HashMap;
use std::sync::Arc;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

use crate::config::AppConfig;
use crate::fetch::providers::{
    calendar::CalendarFetcher, fixture::StaticFetcher, rss::RssFetcher, youtube::YouTubeFetcher,
};
use crate::fetch::types::Fetcher;
use crate::model::SourceKind;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(describe_metrics);
}

/// Register HELP text with the current recorder. Descriptions sent before a
/// recorder is installed are lost, so installing one calls this again.
pub(crate) fn describe_metrics() {
    describe_counter!("feedwatch_cycles_total", "Completed poll cycles.");
    describe_counter!(
        "feedwatch_fetch_errors_total",
        "Fetch failures, labelled by source kind and error class."
    );
    describe_counter!(
        "feedwatch_new_events_total",
        "Events that passed the seen-record filter."
    );
    describe_counter!("feedwatch_deliveries_total", "Messages delivered.");
    describe_counter!(
        "feedwatch_delivery_errors_total",
        "Messages that could not be delivered to a destination."
    );
    describe_histogram!("feedwatch_fetch_ms", "Fetch time per source in milliseconds.");
    describe_gauge!(
        "feedwatch_last_cycle_ts",
        "Unix ts when the poll cycle last finished."
    );
}

/// Decode entities, strip tags, collapse whitespace and cap at `max_chars`.
pub fn clean_text(s: &str, max_chars: usize) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_BR: OnceCell<regex::Regex> = OnceCell::new();
    let re_br = RE_BR.get_or_init(|| regex::Regex::new(r"(?i)<br\s*/?>|</p>").expect("valid regex"));
    out = re_br.replace_all(&out, "\n").to_string();

    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").expect("valid regex"));
    out = re_tags.replace_all(&out, "").to_string();

    // Collapse runs of spaces/tabs but keep paragraph breaks.
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"[ \t\r\f\x{A0}]+").expect("valid regex"));
    out = re_ws.replace_all(&out, " ").to_string();

    static RE_NL: OnceCell<regex::Regex> = OnceCell::new();
    let re_nl = RE_NL.get_or_init(|| regex::Regex::new(r" ?\n ?(\n ?)+").expect("valid regex"));
    out = re_nl.replace_all(&out, "\n\n").to_string();
    out = out.trim().to_string();

    if out.chars().count() > max_chars {
        out = out.chars().take(max_chars).collect();
    }
    out
}

/// Fetchers by source kind.
#[derive(Clone, Default)]
pub struct Fetchers {
    inner: HashMap<SourceKind, Arc<dyn Fetcher>>,
}

impl Fetchers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, kind: SourceKind, fetcher: Arc<dyn Fetcher>) -> Self {
        self.inner.insert(kind, fetcher);
        self
    }

    pub fn insert(&mut self, kind: SourceKind, fetcher: Arc<dyn Fetcher>) {
        self.inner.insert(kind, fetcher);
    }

    pub fn get(&self, kind: SourceKind) -> Option<Arc<dyn Fetcher>> {
        self.inner.get(&kind).cloned()
    }

    /// Production wiring. The community fetcher is returned separately so
    /// the host can push events into it.
    pub fn from_config(cfg: &AppConfig) -> anyhow::Result<(Self, Arc<StaticFetcher>)> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.http_timeout_secs))
            .user_agent(concat!("feedwatch/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let community = Arc::new(StaticFetcher::new("community"));
        let fetchers = Fetchers::new()
            .with(
                SourceKind::Youtube,
                Arc::new(YouTubeFetcher::new(
                    client.clone(),
                    cfg.credentials.youtube_api_key.clone(),
                )),
            )
            .with(
                SourceKind::Calendar,
                Arc::new(CalendarFetcher::new(
                    client.clone(),
                    cfg.credentials.google_api_key.clone(),
                )),
            )
            .with(SourceKind::Rss, Arc::new(RssFetcher::new(client)))
            .with(SourceKind::Community, community.clone());
        Ok((fetchers, community))
    }
}

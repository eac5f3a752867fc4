//! # Engine
//! One poll cycle: for every source, fetch, drop what was already seen,
//! render and deliver the rest to the source's current subscriptions, then
//! commit the processed ids.
//!
//! Failures are contained per source (fetch) and per destination (delivery);
//! neither aborts the cycle.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use serde::Serialize;

use crate::dedup;
use crate::fetch::types::Fetcher;
use crate::fetch::{ensure_metrics_described, Fetchers};
use crate::model::{Event, SourceRecord};
use crate::notify::Outbox;
use crate::render::render;
use crate::scheduler::PeriodicWork;
use crate::store::Store;

#[derive(Debug, Clone)]
pub struct EnginePolicy {
    pub prune_missing_sources: bool,
    /// Used when no `interval` override is stored.
    pub default_interval: Duration,
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self {
            prune_missing_sources: false,
            default_interval: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub sources_polled: usize,
    pub new_events: usize,
    pub deliveries: usize,
    pub delivery_failures: usize,
    pub fetch_failures: usize,
    /// State writes that failed; the cycle carries on from memory.
    pub store_failures: usize,
    /// Keys of sources dropped because upstream no longer has them.
    pub pruned: Vec<String>,
}

impl CycleReport {
    fn absorb(&mut self, other: SourceOutcome) {
        self.new_events += other.new_events;
        self.deliveries += other.deliveries;
        self.delivery_failures += other.delivery_failures;
    }
}

#[derive(Default)]
struct SourceOutcome {
    new_events: usize,
    deliveries: usize,
    delivery_failures: usize,
}

pub struct Engine {
    store: Arc<Store>,
    fetchers: Fetchers,
    outbox: Arc<dyn Outbox>,
    policy: EnginePolicy,
}

impl Engine {
    pub fn new(
        store: Arc<Store>,
        fetchers: Fetchers,
        outbox: Arc<dyn Outbox>,
        policy: EnginePolicy,
    ) -> Self {
        ensure_metrics_described();
        Self {
            store,
            fetchers,
            outbox,
            policy,
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn fetchers(&self) -> &Fetchers {
        &self.fetchers
    }

    pub fn policy(&self) -> &EnginePolicy {
        &self.policy
    }

    pub async fn current_interval(&self) -> Duration {
        self.store
            .interval_override()
            .await
            .unwrap_or(self.policy.default_interval)
    }

    /// Poll every source once. Store write failures are logged and counted
    /// per source; they do not stop the cycle.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> anyhow::Result<CycleReport> {
        let mut report = CycleReport::default();
        if let Err(e) = self.store.flush().await {
            report.store_failures += 1;
            tracing::warn!(error = ?e, "state file still not writable");
        }
        let sources = self.store.sources().await;
        tracing::debug!(sources = sources.len(), "poll cycle starting");

        for rec in sources {
            let key = rec.source.key();
            let Some(fetcher) = self.fetchers.get(rec.source.kind) else {
                tracing::warn!(source = %key, "no fetcher for source kind; skipping");
                report.fetch_failures += 1;
                continue;
            };
            report.sources_polled += 1;

            let t0 = Instant::now();
            let fetched = fetcher.fetch(&rec.source.id).await;
            histogram!("feedwatch_fetch_ms", "kind" => rec.source.kind.as_str())
                .record(t0.elapsed().as_secs_f64() * 1000.0);

            let events = match fetched {
                Ok(evs) => evs,
                Err(e) if e.is_not_found() => {
                    report.fetch_failures += 1;
                    counter!("feedwatch_fetch_errors_total", "kind" => rec.source.kind.as_str())
                        .increment(1);
                    if self.policy.prune_missing_sources {
                        tracing::warn!(source = %key, error = ?e, "source no longer exists; removing");
                        match self.store.remove_source(&key).await {
                            Ok(Some(_)) => report.pruned.push(key),
                            Ok(None) => {}
                            Err(e) => {
                                report.store_failures += 1;
                                tracing::error!(source = %key, error = ?e, "could not remove source");
                            }
                        }
                    } else {
                        tracing::warn!(source = %key, error = ?e, "source not found upstream");
                    }
                    continue;
                }
                Err(e) => {
                    report.fetch_failures += 1;
                    counter!("feedwatch_fetch_errors_total", "kind" => rec.source.kind.as_str())
                        .increment(1);
                    tracing::warn!(source = %key, provider = fetcher.name(), error = ?e, "fetch failed");
                    continue;
                }
            };

            let fresh = dedup::unseen(events, &rec.seen);
            if fresh.is_empty() {
                continue;
            }
            let processed = dedup::processed_ids(&fresh);

            let outcome = self.announce(&rec, fresh, fetcher.as_ref(), now).await;
            counter!("feedwatch_new_events_total", "kind" => rec.source.kind.as_str())
                .increment(outcome.new_events as u64);
            report.absorb(outcome);

            match self.store.mark_seen(&key, processed).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::debug!(source = %key, "source removed during cycle; seen ids discarded")
                }
                Err(e) => {
                    report.store_failures += 1;
                    tracing::error!(source = %key, error = ?e, "seen ids kept in memory only");
                }
            }
        }

        counter!("feedwatch_cycles_total").increment(1);
        gauge!("feedwatch_last_cycle_ts").set(now.timestamp() as f64);
        tracing::info!(
            polled = report.sources_polled,
            new_events = report.new_events,
            deliveries = report.deliveries,
            delivery_failures = report.delivery_failures,
            fetch_failures = report.fetch_failures,
            store_failures = report.store_failures,
            "poll cycle done"
        );
        Ok(report)
    }

    async fn announce(
        &self,
        rec: &SourceRecord,
        fresh: Vec<Event>,
        fetcher: &dyn Fetcher,
        now: DateTime<Utc>,
    ) -> SourceOutcome {
        let key = rec.source.key();
        let label = rec.label.clone().unwrap_or_else(|| rec.source.id.clone());
        let mut out = SourceOutcome::default();

        for event in fresh {
            // Subscriptions may change while we deliver.
            let Some(subs) = self.store.subscriptions(&key).await else {
                tracing::info!(source = %key, "source removed; stopping delivery");
                break;
            };
            out.new_events += 1;

            let event = fetcher.enrich(&rec.source.id, event).await;
            let message = render(&event, &label, now);

            for sub in subs.iter().filter(|s| s.accepts(&event)) {
                let msg = message.clone().with_mention(sub.role.as_deref());
                match self.outbox.deliver(&sub.destination, &msg).await {
                    Ok(()) => {
                        out.deliveries += 1;
                        counter!("feedwatch_deliveries_total").increment(1);
                    }
                    Err(e) => {
                        out.delivery_failures += 1;
                        counter!("feedwatch_delivery_errors_total").increment(1);
                        tracing::warn!(
                            source = %key,
                            destination = %sub.destination,
                            event = %event.id,
                            error = ?e,
                            "delivery failed"
                        );
                    }
                }
            }
        }
        out
    }
}

#[async_trait]
impl PeriodicWork for Engine {
    async fn run(&self) -> anyhow::Result<()> {
        self.run_cycle(Utc::now()).await.map(|_| ())
    }

    async fn interval(&self) -> Duration {
        self.current_interval().await
    }
}

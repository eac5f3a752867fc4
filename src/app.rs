//! Wiring shared by the binaries and the integration tests.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::{watch, Mutex};

use crate::api::AppState;
use crate::commands::CommandContext;
use crate::config::AppConfig;
use crate::engine::{Engine, EnginePolicy};
use crate::fetch::providers::fixture::StaticFetcher;
use crate::fetch::Fetchers;
use crate::notify::{DestinationRouter, Outbox};
use crate::scheduler::PollController;
use crate::store::Store;

pub struct Service {
    pub config: AppConfig,
    pub store: Arc<Store>,
    pub engine: Arc<Engine>,
    pub commands: Arc<CommandContext>,
    pub community: Arc<StaticFetcher>,
}

impl Service {
    /// Production wiring: HTTP fetchers, configured destinations, state on disk.
    pub async fn from_config(config: AppConfig) -> anyhow::Result<Self> {
        let (fetchers, community) = Fetchers::from_config(&config)?;
        let store = Arc::new(Store::open(config.state_path.clone()).await?);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .context("building notifier http client")?;
        let router = DestinationRouter::from_config(&config, client)?;
        let source_count = store.sources().await.len();
        tracing::info!(
            destinations = router.destinations().count(),
            sources = source_count,
            "service wired"
        );
        Ok(Self::with_parts(config, store, fetchers, community, Arc::new(router)))
    }

    pub fn with_parts(
        config: AppConfig,
        store: Arc<Store>,
        fetchers: Fetchers,
        community: Arc<StaticFetcher>,
        outbox: Arc<dyn Outbox>,
    ) -> Self {
        let policy = EnginePolicy {
            prune_missing_sources: config.prune_missing_sources,
            default_interval: config.poll_interval(),
        };
        let engine = Arc::new(Engine::new(store.clone(), fetchers.clone(), outbox, policy));
        let commands = Arc::new(CommandContext::new(
            store.clone(),
            fetchers,
            config.max_subscriptions_per_destination,
        ));
        Self {
            config,
            store,
            engine,
            commands,
            community,
        }
    }

    pub fn poll_controller(&self, ready: watch::Receiver<bool>) -> PollController {
        PollController::new("poll", self.engine.clone(), ready)
    }

    pub fn app_state(&self, poller: PollController) -> AppState {
        AppState {
            store: self.store.clone(),
            commands: self.commands.clone(),
            community: self.community.clone(),
            poller: Arc::new(Mutex::new(poller)),
        }
    }
}

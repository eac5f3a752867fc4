// src/lib.rs
// Public library surface for the binaries and integration tests.

pub mod api;
pub mod app;
pub mod commands;
pub mod config;
pub mod dedup;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod metrics;
pub mod model;
pub mod notify;
pub mod render;
pub mod scheduler;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::api::create_router;
pub use crate::app::Service;
pub use crate::config::AppConfig;
pub use crate::engine::{CycleReport, Engine, EnginePolicy};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Compact tracing logs, `RUST_LOG` aware. Safe to call more than once.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("feedwatch=info,warn"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init();
}

//! Runs a single poll cycle against the configured state and prints the
//! report as JSON. Handy for cron-style deployments and for checking a new
//! config before starting the service.

use anyhow::Context;
use chrono::Utc;
use feedwatch::{init_tracing, AppConfig, Service};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = AppConfig::load_default().context("loading feedwatch config")?;
    let service = Service::from_config(config).await?;
    let report = service.engine.run_cycle(Utc::now()).await?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

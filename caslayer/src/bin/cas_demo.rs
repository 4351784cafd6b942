//! Runs the concurrent counter scenario against an in-memory store.
//!
//! Usage: `cas-demo [config.json]`. Set `RUST_LOG` to change the log level.

use anyhow::Context;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use caslayer::{
    backend::{KvBackend, KvBackendBuilder},
    config::DemoConfig,
    harness::LoadHarness,
    memory::InMemoryStore,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = match std::env::args().nth(1) {
        Some(path) => DemoConfig::from_path(&path).with_context(|| format!("loading {path}"))?,
        None => DemoConfig::default(),
    };

    let store = InMemoryStore::builder()
        .latency(config.store.latency())
        .build()
        .await?;
    let harness = LoadHarness::new(Arc::new(store.clone()), config.harness_config())?;

    let report = harness.run().await?;

    for phase in [&report.without_cas, &report.with_cas] {
        println!("{phase}");
        for failure in &phase.failures {
            println!("  worker {} failed: {}", failure.worker, failure.error);
        }
    }

    drop(harness);
    store.shutdown().await?;

    Ok(())
}

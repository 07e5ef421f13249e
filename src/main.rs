//! Wildfire Pipeline: binary entrypoint
//! Loads config, builds collectors and the pipeline, starts the driver loop and
//! serves the HTTP surface through Shuttle's axum runtime.

use std::sync::Arc;

use anyhow::Context;
use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use wildfire_pipeline::config::PipelineConfig;
use wildfire_pipeline::ingest::build_registry;
use wildfire_pipeline::metrics::Metrics;
use wildfire_pipeline::pipeline::Pipeline;
use wildfire_pipeline::store::{FileStore, MemoryStore, SharedStore};

/// Compact logs by default; `LOG_FORMAT=json` for structured output.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("wildfire_pipeline=info,warn"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    // try_init: the platform runtime may already have installed a subscriber.
    let res = if json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().compact())
            .try_init()
    };
    if res.is_err() {
        eprintln!("tracing subscriber already installed; keeping it");
    }
}

fn build_store(cfg: &PipelineConfig) -> Arc<dyn SharedStore> {
    match &cfg.store.dir {
        Some(dir) => {
            tracing::info!(target: "pipeline", dir = %dir.display(), "using file store");
            Arc::new(FileStore::new(dir.clone()))
        }
        None => {
            tracing::info!(target: "pipeline", "using in-memory store");
            Arc::new(MemoryStore::new())
        }
    }
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    init_tracing();

    let cfg = PipelineConfig::load_default().context("loading pipeline config")?;
    // The recorder must exist before any describe_* call.
    let metrics = Metrics::init(&cfg)?;
    let registry = build_registry(&cfg);
    let collectors = registry.len();
    let store = build_store(&cfg);
    let pipeline = Pipeline::new(cfg.clone(), registry, store);

    if pipeline.warm_start().await {
        tracing::info!(target: "pipeline", "seeded latest snapshot from shared store");
    }
    // Lives for the whole process.
    let _driver = pipeline.spawn_driver();

    let router = wildfire_pipeline::router(pipeline).merge(metrics.router());

    tracing::info!(
        target: "pipeline",
        tick_secs = cfg.tick_secs,
        collectors,
        "wildfire pipeline started"
    );
    Ok(router.into())
}

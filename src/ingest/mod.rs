// src/ingest/mod.rs
pub mod fallback;
pub mod providers;
pub mod registry;
pub mod resilience;
pub mod scheduler;
pub mod types;

use std::sync::Arc;

use metrics::{describe_counter, describe_histogram};
use once_cell::sync::OnceCell;

use crate::config::PipelineConfig;
use crate::ingest::providers::{
    firms::FirmsCollector, open_meteo_terrain::OpenMeteoTerrain,
    open_meteo_weather::OpenMeteoWeather,
};
use crate::ingest::registry::{CollectorPolicy, CollectorRegistry};

/// One-time metrics registration (so series show up on /metrics).
pub fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "collector_attempts_total",
            "Collector calls attempted, including retries."
        );
        describe_counter!("collector_failures_total", "Failed collector attempts.");
        describe_counter!(
            "collector_fallbacks_total",
            "Calls that ended on a cached or synthetic record."
        );
        describe_counter!(
            "collector_rows_skipped_total",
            "Malformed provider rows skipped during parsing."
        );
        describe_histogram!("collector_fetch_ms", "Provider HTTP fetch time in milliseconds.");
    });
}

/// Build the live HTTP collectors enabled in `cfg`.
pub fn build_registry(cfg: &PipelineConfig) -> CollectorRegistry {
    ensure_metrics_described();
    let c = &cfg.collectors;
    let mut reg = CollectorRegistry::new();
    if c.fires.enabled {
        reg.register(
            Arc::new(FirmsCollector::http(c.fires.url.clone(), c.fires.api_key.clone())),
            CollectorPolicy::from(&c.fires),
        );
    }
    if c.weather.enabled {
        reg.register(
            Arc::new(OpenMeteoWeather::http(c.weather.url.clone())),
            CollectorPolicy::from(&c.weather),
        );
    }
    if c.terrain.enabled {
        reg.register(
            Arc::new(OpenMeteoTerrain::http(c.terrain.url.clone())),
            CollectorPolicy::from(&c.terrain),
        );
    }
    tracing::info!(target: "ingest", collectors = reg.len(), "collector registry built");
    reg
}

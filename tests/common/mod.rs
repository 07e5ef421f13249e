// tests/common/mod.rs
//
// Shared test doubles and builders for the integration tests.
#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;

use wildfire_pipeline::cache::{CacheOptions, SnapshotCache};
use wildfire_pipeline::config::PipelineConfig;
use wildfire_pipeline::error::SourceError;
use wildfire_pipeline::ingest::registry::{CollectorPolicy, CollectorRegistry, RetryPolicy};
use wildfire_pipeline::ingest::types::{
    BoundingBox, FireDetection, HealthFlag, Payload, SourceCollector, SourceKind, TerrainSample,
    WeatherObservation,
};
use wildfire_pipeline::pipeline::Pipeline;
use wildfire_pipeline::processor;
use wildfire_pipeline::store::{MemoryStore, SharedStore};

/// What a scripted collector does on one call.
#[derive(Clone, Debug)]
pub enum Step {
    Ok(Payload),
    Fail(SourceError),
    /// Never resolves; only a timeout ends the call.
    Hang,
}

/// Collector that replays a script, then repeats `fallback` forever.
pub struct ScriptedCollector {
    id: String,
    kind: SourceKind,
    health: HealthFlag,
    script: Mutex<VecDeque<Step>>,
    fallback: Step,
    delay: Option<Duration>,
    calls: Mutex<u32>,
}

impl ScriptedCollector {
    pub fn new(id: &str, kind: SourceKind, fallback: Step) -> Self {
        Self {
            id: id.to_string(),
            kind,
            health: HealthFlag::new(),
            script: Mutex::new(VecDeque::new()),
            fallback,
            delay: None,
            calls: Mutex::new(0),
        }
    }

    pub fn ok(id: &str, payload: Payload) -> Self {
        let kind = payload.kind();
        Self::new(id, kind, Step::Ok(payload))
    }

    pub fn unreachable(id: &str, kind: SourceKind) -> Self {
        Self::new(
            id,
            kind,
            Step::Fail(SourceError::unavailable("connection refused")),
        )
    }

    pub fn hanging(id: &str, kind: SourceKind) -> Self {
        Self::new(id, kind, Step::Hang)
    }

    pub fn then(self, step: Step) -> Self {
        self.script.lock().push_back(step);
        self
    }

    pub fn with_delay(mut self, d: Duration) -> Self {
        self.delay = Some(d);
        self
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock()
    }
}

#[async_trait]
impl SourceCollector for ScriptedCollector {
    fn source_id(&self) -> &str {
        &self.id
    }

    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn health(&self) -> &HealthFlag {
        &self.health
    }

    async fn collect(&self, _bounds: &BoundingBox) -> Result<Payload, SourceError> {
        *self.calls.lock() += 1;
        let step = self
            .script
            .lock()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        match step {
            Step::Ok(p) => Ok(p),
            Step::Fail(e) => Err(e),
            Step::Hang => std::future::pending().await,
        }
    }
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 8, 1, 12, 0, 0).unwrap()
}

pub fn fire(id: &str, lat: f64, lon: f64, minutes_ago: i64) -> FireDetection {
    FireDetection {
        id: id.to_string(),
        latitude: lat,
        longitude: lon,
        intensity: 0.4,
        area_hectares: 12.0,
        confidence: 0.8,
        detected_at: t0() - chrono::Duration::minutes(minutes_ago),
        satellite_or_source: "N".to_string(),
    }
}

pub fn fires_payload() -> Payload {
    Payload::Fires(vec![
        fire("N-1", 36.5, -119.5, 30),
        fire("N-2", 38.2, -121.1, 10),
    ])
}

pub fn station(id: &str, temp: f64, rh: f64, wind: f64) -> WeatherObservation {
    WeatherObservation {
        station_id: id.to_string(),
        latitude: 36.0,
        longitude: -120.0,
        temperature_c: temp,
        relative_humidity_pct: rh,
        wind_speed_ms: wind,
        wind_direction_deg: 300.0,
        observed_at: t0(),
    }
}

pub fn weather_payload() -> Payload {
    Payload::Weather(vec![station("a", 32.0, 15.0, 8.0), station("b", 28.0, 25.0, 4.0)])
}

pub fn terrain_payload() -> Payload {
    Payload::Terrain(vec![
        TerrainSample {
            latitude: 36.0,
            longitude: -120.0,
            elevation_m: 250.0,
            slope_deg: 3.0,
        },
        TerrainSample {
            latitude: 37.0,
            longitude: -119.0,
            elevation_m: 2_100.0,
            slope_deg: 21.0,
        },
    ])
}

/// Short timeouts and backoff so retry paths finish quickly.
pub fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        timeout: Duration::from_millis(200),
        backoff_base: Duration::from_millis(10),
        backoff_cap: Duration::from_millis(40),
    }
}

pub fn policy(interval: Duration) -> CollectorPolicy {
    CollectorPolicy::every(interval).with_retry(fast_retry())
}

pub fn cache_on(store: Arc<dyn SharedStore>) -> SnapshotCache {
    SnapshotCache::new(
        store,
        CacheOptions::default(),
        processor::startup_placeholder(&BoundingBox::default(), t0()),
    )
}

/// Registry of three healthy collectors (fires, weather, terrain).
pub fn healthy_registry() -> (CollectorRegistry, Vec<Arc<ScriptedCollector>>) {
    registry_of(vec![
        Arc::new(ScriptedCollector::ok("firms", fires_payload())),
        Arc::new(ScriptedCollector::ok("weather", weather_payload())),
        Arc::new(ScriptedCollector::ok("terrain", terrain_payload())),
    ])
}

pub fn unreachable_registry() -> (CollectorRegistry, Vec<Arc<ScriptedCollector>>) {
    registry_of(vec![
        Arc::new(ScriptedCollector::unreachable("firms", SourceKind::Fires)),
        Arc::new(ScriptedCollector::unreachable("weather", SourceKind::Weather)),
        Arc::new(ScriptedCollector::unreachable("terrain", SourceKind::Terrain)),
    ])
}

pub fn registry_of(
    collectors: Vec<Arc<ScriptedCollector>>,
) -> (CollectorRegistry, Vec<Arc<ScriptedCollector>>) {
    let mut reg = CollectorRegistry::new();
    for c in &collectors {
        reg.register(c.clone(), policy(Duration::from_secs(300)));
    }
    (reg, collectors)
}

pub fn pipeline_with(registry: CollectorRegistry) -> (Pipeline, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let pipeline = Pipeline::new(PipelineConfig::default(), registry, store.clone());
    (pipeline, store)
}

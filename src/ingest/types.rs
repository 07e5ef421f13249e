// src/ingest/types.rs
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SourceError;

/// WGS84 bounding box; collectors and the processor share it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lon: f64,
    pub max_lon: f64,
}

impl BoundingBox {
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat.is_finite()
            && lon.is_finite()
            && (self.min_lat..=self.max_lat).contains(&lat)
            && (self.min_lon..=self.max_lon).contains(&lon)
    }

    pub fn is_valid(&self) -> bool {
        let finite = [self.min_lat, self.max_lat, self.min_lon, self.max_lon]
            .iter()
            .all(|v| v.is_finite());
        finite
            && self.min_lat < self.max_lat
            && self.min_lon < self.max_lon
            && (-90.0..=90.0).contains(&self.min_lat)
            && (-90.0..=90.0).contains(&self.max_lat)
            && (-180.0..=180.0).contains(&self.min_lon)
            && (-180.0..=180.0).contains(&self.max_lon)
    }

    /// Evenly spaced `rows x cols` sample points (cell centres), row-major from the south-west.
    pub fn grid(&self, rows: usize, cols: usize) -> Vec<(f64, f64)> {
        let rows = rows.max(1);
        let cols = cols.max(1);
        let dlat = (self.max_lat - self.min_lat) / rows as f64;
        let dlon = (self.max_lon - self.min_lon) / cols as f64;
        let mut out = Vec::with_capacity(rows * cols);
        for r in 0..rows {
            for c in 0..cols {
                out.push((
                    self.min_lat + dlat * (r as f64 + 0.5),
                    self.min_lon + dlon * (c as f64 + 0.5),
                ));
            }
        }
        out
    }
}

impl Default for BoundingBox {
    /// California operational area.
    fn default() -> Self {
        Self {
            min_lat: 32.5,
            max_lat: 42.0,
            min_lon: -124.5,
            max_lon: -114.1,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Fires,
    Weather,
    Terrain,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Fires => "fires",
            SourceKind::Weather => "weather",
            SourceKind::Terrain => "terrain",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FireDetection {
    pub id: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Normalized 0..=1.
    pub intensity: f64,
    pub area_hectares: f64,
    /// Normalized 0..=1.
    pub confidence: f64,
    pub detected_at: DateTime<Utc>,
    pub satellite_or_source: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherObservation {
    pub station_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub temperature_c: f64,
    pub relative_humidity_pct: f64,
    pub wind_speed_ms: f64,
    pub wind_direction_deg: f64,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerrainSample {
    pub latitude: f64,
    pub longitude: f64,
    pub elevation_m: f64,
    pub slope_deg: f64,
}

/// Provider-specific structured data, already in metric/WGS84 units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Payload {
    Fires(Vec<FireDetection>),
    Weather(Vec<WeatherObservation>),
    Terrain(Vec<TerrainSample>),
}

impl Payload {
    pub fn kind(&self) -> SourceKind {
        match self {
            Payload::Fires(_) => SourceKind::Fires,
            Payload::Weather(_) => SourceKind::Weather,
            Payload::Terrain(_) => SourceKind::Terrain,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Payload::Fires(v) => v.len(),
            Payload::Weather(v) => v.len(),
            Payload::Terrain(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn empty(kind: SourceKind) -> Self {
        match kind {
            SourceKind::Fires => Payload::Fires(Vec::new()),
            SourceKind::Weather => Payload::Weather(Vec::new()),
            SourceKind::Terrain => Payload::Terrain(Vec::new()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Ok,
    Degraded,
    Failed,
}

/// One collector's output for one cycle. Never mutated once returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub source_id: String,
    pub collected_at: DateTime<Utc>,
    pub payload: Payload,
    pub status: RecordStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ProviderRecord {
    pub fn ok(source_id: impl Into<String>, collected_at: DateTime<Utc>, payload: Payload) -> Self {
        Self {
            source_id: source_id.into(),
            collected_at,
            payload,
            status: RecordStatus::Ok,
            error: None,
        }
    }

    pub fn failed(
        source_id: impl Into<String>,
        kind: SourceKind,
        collected_at: DateTime<Utc>,
        error: &SourceError,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            collected_at,
            payload: Payload::empty(kind),
            status: RecordStatus::Failed,
            error: Some(error.to_string()),
        }
    }

    pub fn kind(&self) -> SourceKind {
        self.payload.kind()
    }

    pub fn is_live(&self) -> bool {
        self.status == RecordStatus::Ok
    }
}

/// Health flag a collector exposes for external readiness checks.
#[derive(Debug)]
pub struct HealthFlag(AtomicBool);

impl HealthFlag {
    pub fn new() -> Self {
        Self(AtomicBool::new(true))
    }

    pub fn get(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    pub fn set(&self, healthy: bool) {
        self.0.store(healthy, Ordering::Relaxed);
    }
}

impl Default for HealthFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Adapter for one external provider.
///
/// Implementations must not retry; the resilience wrapper owns retry policy.
/// Cancellation happens by dropping the `collect` future when the per-call
/// timeout elapses.
#[async_trait::async_trait]
pub trait SourceCollector: Send + Sync {
    fn source_id(&self) -> &str;

    fn kind(&self) -> SourceKind;

    fn health(&self) -> &HealthFlag;

    /// Fetch and normalize one payload for `bounds`.
    async fn collect(&self, bounds: &BoundingBox) -> Result<Payload, SourceError>;

    /// Run `collect` and fold the outcome into a record; failures become `failed` records.
    async fn fetch(&self, bounds: &BoundingBox) -> ProviderRecord {
        let result = self.collect(bounds).await;
        let now = Utc::now();
        match result {
            Ok(payload) => {
                self.health().set(true);
                ProviderRecord::ok(self.source_id(), now, payload)
            }
            Err(e) => {
                self.health().set(false);
                ProviderRecord::failed(self.source_id(), self.kind(), now, &e)
            }
        }
    }

    fn is_healthy(&self) -> bool {
        self.health().get()
    }
}

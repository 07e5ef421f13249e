//! Unified snapshot: the one fully-populated view handed to every consumer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ingest::types::FireDetection;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityLevel {
    High,
    Degraded,
    Fallback,
}

impl QualityLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            QualityLevel::High => "high",
            QualityLevel::Degraded => "degraded",
            QualityLevel::Fallback => "fallback",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotSection {
    Fires,
    Weather,
    Terrain,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeatherSummary {
    pub station_count: usize,
    pub mean_temperature_c: f64,
    pub mean_relative_humidity_pct: f64,
    pub mean_wind_speed_ms: f64,
    pub max_wind_speed_ms: f64,
    /// Vector mean, 0..360.
    pub wind_direction_deg: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerrainSummary {
    pub sample_count: usize,
    pub mean_elevation_m: f64,
    pub min_elevation_m: f64,
    pub max_elevation_m: f64,
    pub relief_m: f64,
    pub mean_slope_deg: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
    Extreme,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FireWeatherIndices {
    /// 0..=100.
    pub fire_weather_index: f64,
    /// 0..=1.
    pub spread_potential: f64,
    pub total_active_area_ha: f64,
    pub max_fire_intensity: f64,
    pub risk_level: RiskLevel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedSnapshot {
    pub fires: Vec<FireDetection>,
    pub weather: WeatherSummary,
    pub terrain: TerrainSummary,
    pub derived: FireWeatherIndices,
    /// Source ids that contributed live or cached data.
    pub sources: Vec<String>,
    pub quality: QualityLevel,
    /// Sections filled from static defaults.
    pub synthetic_sections: Vec<SnapshotSection>,
    pub generated_at: DateTime<Utc>,
}

impl UnifiedSnapshot {
    pub fn is_synthetic(&self, section: SnapshotSection) -> bool {
        self.synthetic_sections.contains(&section)
    }
}

/// Filtered event published on the `fires` channel.
#[derive(Debug, Clone, Serialize)]
pub struct FiresEvent<'a> {
    pub generated_at: DateTime<Utc>,
    pub quality: QualityLevel,
    pub fires: &'a [FireDetection],
}

/// Filtered event published on the `weather` channel.
#[derive(Debug, Clone, Serialize)]
pub struct WeatherEvent<'a> {
    pub generated_at: DateTime<Utc>,
    pub quality: QualityLevel,
    pub weather: &'a WeatherSummary,
    pub derived: &'a FireWeatherIndices,
}

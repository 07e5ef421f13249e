//! # Data Processor
//! Merges one record per collector into a [`UnifiedSnapshot`].
//!
//! - Validates every entry; an invalid entry is dropped on its own, never the whole record.
//! - Sections with no valid data are filled from [`crate::ingest::fallback`] defaults.
//! - Derived indices are pure functions of the merged data. No I/O happens here.

use std::collections::{BTreeMap, HashSet};

use chrono::{DateTime, Utc};
use metrics::counter;

use crate::error::MergeValidationError;
use crate::ingest::fallback;
use crate::ingest::types::{
    BoundingBox, FireDetection, Payload, ProviderRecord, RecordStatus, TerrainSample,
    WeatherObservation,
};
use crate::snapshot::{
    FireWeatherIndices, QualityLevel, RiskLevel, SnapshotSection, TerrainSummary,
    UnifiedSnapshot, WeatherSummary,
};

/// Snapshot plus the entries rejected while building it.
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub snapshot: UnifiedSnapshot,
    pub dropped: Vec<MergeValidationError>,
}

pub fn merge(
    records: &BTreeMap<String, ProviderRecord>,
    bounds: &BoundingBox,
    generated_at: DateTime<Utc>,
) -> MergeOutcome {
    let mut dropped = Vec::new();
    let mut fires: Vec<FireDetection> = Vec::new();
    let mut seen_fire_ids: HashSet<String> = HashSet::new();
    let mut weather_obs: Vec<&WeatherObservation> = Vec::new();
    let mut terrain_samples: Vec<&TerrainSample> = Vec::new();
    let mut sources = Vec::new();
    let mut have_fire_source = false;

    for rec in records.values() {
        // Failed records carry synthetic (empty) payloads only.
        if rec.status == RecordStatus::Failed {
            continue;
        }
        let contributed = match &rec.payload {
            Payload::Fires(list) => {
                have_fire_source = true;
                for f in list {
                    match validate_fire(f, bounds) {
                        Ok(()) => {
                            if seen_fire_ids.insert(f.id.clone()) {
                                fires.push(f.clone());
                            }
                        }
                        Err(e) => dropped.push(e),
                    }
                }
                // An empty detection list is still a live observation.
                true
            }
            Payload::Weather(list) => {
                let before = weather_obs.len();
                for w in list {
                    match validate_weather(w) {
                        Ok(()) => weather_obs.push(w),
                        Err(e) => dropped.push(e),
                    }
                }
                weather_obs.len() > before
            }
            Payload::Terrain(list) => {
                let before = terrain_samples.len();
                for t in list {
                    match validate_terrain(t) {
                        Ok(()) => terrain_samples.push(t),
                        Err(e) => dropped.push(e),
                    }
                }
                terrain_samples.len() > before
            }
        };
        if contributed {
            sources.push(rec.source_id.clone());
        }
    }

    for e in &dropped {
        counter!("merge_dropped_entries_total", "section" => e.section).increment(1);
        tracing::debug!(target: "pipeline", error = %e, "dropped invalid entry");
    }

    let mut synthetic_sections = Vec::new();
    if !have_fire_source {
        synthetic_sections.push(SnapshotSection::Fires);
    }
    let weather = summarize_weather(&weather_obs).unwrap_or_else(|| {
        synthetic_sections.push(SnapshotSection::Weather);
        default_weather()
    });
    let terrain = summarize_terrain(&terrain_samples).unwrap_or_else(|| {
        synthetic_sections.push(SnapshotSection::Terrain);
        default_terrain()
    });

    fires.sort_by(|a, b| {
        b.detected_at
            .cmp(&a.detected_at)
            .then_with(|| a.id.cmp(&b.id))
    });

    let derived = derive_indices(&fires, &weather, &terrain);
    let quality = quality_for(records, &synthetic_sections);

    MergeOutcome {
        snapshot: UnifiedSnapshot {
            fires,
            weather,
            terrain,
            derived,
            sources,
            quality,
            synthetic_sections,
            generated_at,
        },
        dropped,
    }
}

/// Fully synthetic snapshot served before the first cycle completes.
pub fn startup_placeholder(bounds: &BoundingBox, at: DateTime<Utc>) -> UnifiedSnapshot {
    merge(&BTreeMap::new(), bounds, at).snapshot
}

pub fn quality_for(
    records: &BTreeMap<String, ProviderRecord>,
    synthetic_sections: &[SnapshotSection],
) -> QualityLevel {
    let any_usable = records
        .values()
        .any(|r| matches!(r.status, RecordStatus::Ok | RecordStatus::Degraded));
    if !any_usable {
        return QualityLevel::Fallback;
    }
    let all_live = records.values().all(|r| r.status == RecordStatus::Ok);
    if all_live && synthetic_sections.is_empty() {
        QualityLevel::High
    } else {
        QualityLevel::Degraded
    }
}

fn in_unit(v: f64) -> bool {
    v.is_finite() && (0.0..=1.0).contains(&v)
}

pub fn validate_fire(f: &FireDetection, bounds: &BoundingBox) -> Result<(), MergeValidationError> {
    if f.id.trim().is_empty() {
        return Err(MergeValidationError::new("fires", "id", "empty id"));
    }
    if !bounds.contains(f.latitude, f.longitude) {
        return Err(MergeValidationError::new(
            "fires",
            "coordinates",
            format!("({}, {}) outside operational bounds", f.latitude, f.longitude),
        ));
    }
    if !in_unit(f.intensity) {
        return Err(MergeValidationError::new(
            "fires",
            "intensity",
            format!("{} not in [0,1]", f.intensity),
        ));
    }
    if !in_unit(f.confidence) {
        return Err(MergeValidationError::new(
            "fires",
            "confidence",
            format!("{} not in [0,1]", f.confidence),
        ));
    }
    if !(f.area_hectares.is_finite() && f.area_hectares >= 0.0) {
        return Err(MergeValidationError::new(
            "fires",
            "area_hectares",
            format!("{} is negative or not finite", f.area_hectares),
        ));
    }
    Ok(())
}

fn check_range(
    section: &'static str,
    field: &'static str,
    v: f64,
    lo: f64,
    hi: f64,
    hi_inclusive: bool,
) -> Result<(), MergeValidationError> {
    let below_hi = if hi_inclusive { v <= hi } else { v < hi };
    let ok = v.is_finite() && v >= lo && below_hi;
    if ok {
        Ok(())
    } else {
        Err(MergeValidationError::new(
            section,
            field,
            format!("{v} outside [{lo}, {hi}{}", if hi_inclusive { "]" } else { ")" }),
        ))
    }
}

/// WGS84 range only: providers may snap samples to a grid cell just outside the bounds.
fn check_coords(section: &'static str, lat: f64, lon: f64) -> Result<(), MergeValidationError> {
    check_range(section, "latitude", lat, -90.0, 90.0, true)?;
    check_range(section, "longitude", lon, -180.0, 180.0, true)
}

pub fn validate_weather(w: &WeatherObservation) -> Result<(), MergeValidationError> {
    check_coords("weather", w.latitude, w.longitude)?;
    check_range("weather", "temperature_c", w.temperature_c, -90.0, 60.0, true)?;
    check_range("weather", "relative_humidity_pct", w.relative_humidity_pct, 0.0, 100.0, true)?;
    check_range("weather", "wind_speed_ms", w.wind_speed_ms, 0.0, 120.0, false)?;
    check_range("weather", "wind_direction_deg", w.wind_direction_deg, 0.0, 360.0, true)?;
    Ok(())
}

pub fn validate_terrain(t: &TerrainSample) -> Result<(), MergeValidationError> {
    check_coords("terrain", t.latitude, t.longitude)?;
    check_range("terrain", "elevation_m", t.elevation_m, -500.0, 9_000.0, true)?;
    check_range("terrain", "slope_deg", t.slope_deg, 0.0, 90.0, true)?;
    Ok(())
}

fn summarize_weather(obs: &[&WeatherObservation]) -> Option<WeatherSummary> {
    if obs.is_empty() {
        return None;
    }
    let n = obs.len() as f64;
    let mean = |f: fn(&WeatherObservation) -> f64| obs.iter().map(|o| f(o)).sum::<f64>() / n;
    let (sin_sum, cos_sum) = obs.iter().fold((0.0, 0.0), |(s, c), o| {
        let r = o.wind_direction_deg.to_radians();
        (s + r.sin(), c + r.cos())
    });
    let wind_direction_deg = if sin_sum.abs() < 1e-9 && cos_sum.abs() < 1e-9 {
        fallback::DEFAULT_WIND_DIRECTION_DEG
    } else {
        sin_sum.atan2(cos_sum).to_degrees().rem_euclid(360.0)
    };
    Some(WeatherSummary {
        station_count: obs.len(),
        mean_temperature_c: mean(|o| o.temperature_c),
        mean_relative_humidity_pct: mean(|o| o.relative_humidity_pct),
        mean_wind_speed_ms: mean(|o| o.wind_speed_ms),
        max_wind_speed_ms: obs.iter().map(|o| o.wind_speed_ms).fold(0.0, f64::max),
        wind_direction_deg,
    })
}

fn summarize_terrain(samples: &[&TerrainSample]) -> Option<TerrainSummary> {
    if samples.is_empty() {
        return None;
    }
    let n = samples.len() as f64;
    let min = samples
        .iter()
        .map(|s| s.elevation_m)
        .fold(f64::INFINITY, f64::min);
    let max = samples
        .iter()
        .map(|s| s.elevation_m)
        .fold(f64::NEG_INFINITY, f64::max);
    Some(TerrainSummary {
        sample_count: samples.len(),
        mean_elevation_m: samples.iter().map(|s| s.elevation_m).sum::<f64>() / n,
        min_elevation_m: min,
        max_elevation_m: max,
        relief_m: max - min,
        mean_slope_deg: samples.iter().map(|s| s.slope_deg).sum::<f64>() / n,
    })
}

pub fn default_weather() -> WeatherSummary {
    WeatherSummary {
        station_count: 0,
        mean_temperature_c: fallback::DEFAULT_TEMPERATURE_C,
        mean_relative_humidity_pct: fallback::DEFAULT_RELATIVE_HUMIDITY_PCT,
        mean_wind_speed_ms: fallback::DEFAULT_WIND_SPEED_MS,
        max_wind_speed_ms: fallback::DEFAULT_WIND_SPEED_MS,
        wind_direction_deg: fallback::DEFAULT_WIND_DIRECTION_DEG,
    }
}

pub fn default_terrain() -> TerrainSummary {
    TerrainSummary {
        sample_count: 0,
        mean_elevation_m: fallback::DEFAULT_ELEVATION_M,
        min_elevation_m: fallback::DEFAULT_ELEVATION_M,
        max_elevation_m: fallback::DEFAULT_ELEVATION_M,
        relief_m: 0.0,
        mean_slope_deg: fallback::DEFAULT_SLOPE_DEG,
    }
}

/// Hot-dry-windy style index in 0..=100: 35 pts heat (saturating at 40 °C),
/// 35 pts dryness, 30 pts wind (saturating at 20 m/s).
pub fn fire_weather_index(w: &WeatherSummary) -> f64 {
    let heat = (w.mean_temperature_c.max(0.0) / 40.0).min(1.0);
    let dryness = ((100.0 - w.mean_relative_humidity_pct) / 100.0).clamp(0.0, 1.0);
    let wind = (w.max_wind_speed_ms / 20.0).clamp(0.0, 1.0);
    (35.0 * heat + 35.0 * dryness + 30.0 * wind).clamp(0.0, 100.0)
}

pub fn risk_level(fwi: f64) -> RiskLevel {
    match fwi {
        x if x < 25.0 => RiskLevel::Low,
        x if x < 50.0 => RiskLevel::Moderate,
        x if x < 75.0 => RiskLevel::High,
        _ => RiskLevel::Extreme,
    }
}

pub fn derive_indices(
    fires: &[FireDetection],
    weather: &WeatherSummary,
    terrain: &TerrainSummary,
) -> FireWeatherIndices {
    let fwi = fire_weather_index(weather);
    // Steeper terrain spreads fire upslope faster; flat ground halves the potential.
    let slope_factor = (terrain.mean_slope_deg / 45.0).clamp(0.0, 1.0);
    let spread_potential = ((fwi / 100.0) * (1.0 + slope_factor) / 2.0).clamp(0.0, 1.0);
    FireWeatherIndices {
        fire_weather_index: fwi,
        spread_potential,
        total_active_area_ha: fires.iter().map(|f| f.area_hectares).sum(),
        max_fire_intensity: fires.iter().map(|f| f.intensity).fold(0.0, f64::max),
        risk_level: risk_level(fwi),
    }
}

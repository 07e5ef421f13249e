// src/ingest/fallback.rs
//! Static, documented defaults used when no live or cached data exists.
//!
//! Synthetic records carry `status = failed` plus the last error, and an empty
//! payload: the processor fills the section from the constants below, so the
//! snapshot never has an absent section and nothing downstream branches on
//! "missing data".

use chrono::{DateTime, Utc};

use crate::error::SourceError;
use crate::ingest::types::{Payload, ProviderRecord, RecordStatus, SourceKind};

/// Mild, dry-season afternoon.
pub const DEFAULT_TEMPERATURE_C: f64 = 20.0;
pub const DEFAULT_RELATIVE_HUMIDITY_PCT: f64 = 40.0;
pub const DEFAULT_WIND_SPEED_MS: f64 = 3.0;
/// Prevailing westerly.
pub const DEFAULT_WIND_DIRECTION_DEG: f64 = 270.0;

pub const DEFAULT_ELEVATION_M: f64 = 500.0;
pub const DEFAULT_SLOPE_DEG: f64 = 5.0;

/// Record handed to the processor when retries are exhausted and no cached record exists.
pub fn synthetic_record(
    source_id: &str,
    kind: SourceKind,
    now: DateTime<Utc>,
    last_error: Option<&SourceError>,
) -> ProviderRecord {
    let reason = match last_error {
        Some(e) => format!("synthetic fallback: {e}"),
        None => "synthetic fallback: no data".to_string(),
    };
    ProviderRecord {
        source_id: source_id.to_string(),
        collected_at: now,
        payload: Payload::empty(kind),
        status: RecordStatus::Failed,
        error: Some(reason),
    }
}

/// Re-tag a last-known-good record as served from cache.
pub fn degraded_from_cache(cached: &ProviderRecord, last_error: Option<&SourceError>) -> ProviderRecord {
    let mut rec = cached.clone();
    rec.status = RecordStatus::Degraded;
    rec.error = Some(match last_error {
        Some(e) => format!("served from cache: {e}"),
        None => "served from cache".to_string(),
    });
    rec
}

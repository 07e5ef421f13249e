// src/ingest/resilience.rs
//! Uniform failure policy around every collector call:
//! timeout → bounded retry with exponential backoff → last-known-good from the
//! snapshot cache (tagged `degraded`) → synthetic record (tagged `failed`).
//!
//! Exactly one record comes out per call, so the processor always sees one
//! record per registered collector.

use chrono::Utc;
use metrics::counter;

use crate::cache::SnapshotCache;
use crate::error::SourceError;
use crate::ingest::fallback;
use crate::ingest::registry::RegisteredCollector;
use crate::ingest::types::{BoundingBox, ProviderRecord, RecordStatus};

/// Where the returned record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOrigin {
    Live,
    Cache,
    Synthetic,
}

impl RecordOrigin {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordOrigin::Live => "live",
            RecordOrigin::Cache => "cache",
            RecordOrigin::Synthetic => "synthetic",
        }
    }
}

#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub record: ProviderRecord,
    pub origin: RecordOrigin,
    pub attempts: u32,
    pub last_error: Option<SourceError>,
}

impl CallOutcome {
    pub fn is_live(&self) -> bool {
        self.origin == RecordOrigin::Live
    }
}

#[derive(Clone)]
pub struct ResilienceWrapper {
    cache: SnapshotCache,
}

impl ResilienceWrapper {
    pub fn new(cache: SnapshotCache) -> Self {
        Self { cache }
    }

    pub async fn call(&self, entry: &RegisteredCollector, bounds: &BoundingBox) -> CallOutcome {
        let collector = &entry.collector;
        let source = collector.source_id().to_string();
        let policy = entry.policy.retry;
        let max_attempts = policy.max_attempts.max(1);
        let mut last_error: Option<SourceError> = None;

        for attempt in 0..max_attempts {
            counter!("collector_attempts_total", "source" => source.clone()).increment(1);

            let result = match tokio::time::timeout(policy.timeout, collector.fetch(bounds)).await {
                Ok(rec) if rec.status == RecordStatus::Failed => Err(SourceError::unavailable(
                    rec.error.unwrap_or_else(|| "collector reported failure".to_string()),
                )),
                Ok(rec) => Ok(rec),
                Err(_) => {
                    // The in-flight future is dropped here; its result, if any, is discarded.
                    collector.health().set(false);
                    Err(SourceError::Timeout {
                        after: policy.timeout,
                    })
                }
            };

            match result {
                Ok(rec) => {
                    self.cache.remember_record(&rec).await;
                    if attempt > 0 {
                        tracing::info!(target: "ingest", source = %source, attempt = attempt + 1, "collector recovered after retry");
                    }
                    return CallOutcome {
                        record: rec,
                        origin: RecordOrigin::Live,
                        attempts: attempt + 1,
                        last_error,
                    };
                }
                Err(e) => {
                    counter!("collector_failures_total", "source" => source.clone()).increment(1);
                    tracing::warn!(
                        target: "ingest",
                        event = "collector_failed",
                        source = %source,
                        attempt = attempt + 1,
                        max_attempts,
                        kind = e.label(),
                        error = %e,
                        "collector attempt failed"
                    );
                    last_error = Some(e);
                    if attempt + 1 < max_attempts {
                        tokio::time::sleep(policy.backoff_for(attempt)).await;
                    }
                }
            }
        }

        let (record, origin) = match self.cache.last_good_record(&source).await {
            Some(cached) => (
                fallback::degraded_from_cache(&cached, last_error.as_ref()),
                RecordOrigin::Cache,
            ),
            None => (
                fallback::synthetic_record(
                    &source,
                    collector.kind(),
                    Utc::now(),
                    last_error.as_ref(),
                ),
                RecordOrigin::Synthetic,
            ),
        };
        counter!(
            "collector_fallbacks_total",
            "source" => source.clone(),
            "origin" => origin.as_str()
        )
        .increment(1);
        tracing::warn!(
            target: "ingest",
            event = "collector_fallback",
            source = %source,
            origin = origin.as_str(),
            attempts = max_attempts,
            "retries exhausted; serving fallback record"
        );

        CallOutcome {
            record,
            origin,
            attempts: max_attempts,
            last_error,
        }
    }
}

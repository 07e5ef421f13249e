//! # Snapshot Cache
//! Two tiers:
//! - in-process: latest snapshot + bounded [`SnapshotHistory`], read without touching the network;
//! - shared store: write-through copy of the latest snapshot and of each source's
//!   last-known-good record, each with a TTL.
//!
//! When the store is unreachable the cache keeps serving the in-process tier and
//! flags itself degraded until the next successful store write.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::counter;

use crate::error::{PipelineError, StoreError};
use crate::history::SnapshotHistory;
use crate::ingest::types::ProviderRecord;
use crate::snapshot::UnifiedSnapshot;
use crate::store::{SharedStore, StoreKeys};

#[derive(Debug, Clone)]
pub struct CacheOptions {
    pub history_capacity: usize,
    pub snapshot_ttl: Duration,
    pub record_ttl: Duration,
    pub keys: StoreKeys,
}

impl Default for CacheOptions {
    fn default() -> Self {
        Self {
            history_capacity: 500,
            snapshot_ttl: Duration::from_secs(900),
            record_ttl: Duration::from_secs(7_200),
            keys: StoreKeys::default(),
        }
    }
}

#[derive(Clone)]
pub struct SnapshotCache {
    inner: Arc<Inner>,
}

struct Inner {
    latest: RwLock<Arc<UnifiedSnapshot>>,
    history: SnapshotHistory,
    store: Arc<dyn SharedStore>,
    opts: CacheOptions,
    /// Local mirror of per-source records, used when the store is unreachable.
    last_good: RwLock<HashMap<String, ProviderRecord>>,
    store_degraded: AtomicBool,
}

impl SnapshotCache {
    pub fn new(store: Arc<dyn SharedStore>, opts: CacheOptions, placeholder: UnifiedSnapshot) -> Self {
        Self {
            inner: Arc::new(Inner {
                latest: RwLock::new(Arc::new(placeholder)),
                history: SnapshotHistory::with_capacity(opts.history_capacity),
                store,
                opts,
                last_good: RwLock::new(HashMap::new()),
                store_degraded: AtomicBool::new(false),
            }),
        }
    }

    /// Never blocks on I/O.
    pub fn latest(&self) -> Arc<UnifiedSnapshot> {
        self.inner
            .latest
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub fn history(&self, limit: usize) -> Vec<Arc<UnifiedSnapshot>> {
        self.inner.history.snapshot_last_n(limit)
    }

    pub fn history_since(&self, ts: DateTime<Utc>) -> Vec<Arc<UnifiedSnapshot>> {
        self.inner.history.since(ts)
    }

    pub fn history_len(&self) -> usize {
        self.inner.history.len()
    }

    pub fn is_store_degraded(&self) -> bool {
        self.inner.store_degraded.load(Ordering::Relaxed)
    }

    pub fn keys(&self) -> &StoreKeys {
        &self.inner.opts.keys
    }

    pub fn store(&self) -> &Arc<dyn SharedStore> {
        &self.inner.store
    }

    /// Install a new snapshot. The store write is best effort; the in-process
    /// tier is always updated.
    pub async fn put(&self, snapshot: UnifiedSnapshot) -> Arc<UnifiedSnapshot> {
        let snap = Arc::new(snapshot);
        if let Err(e) = self.write_shared(&snap).await {
            self.note_store_error(&e, "snapshot write");
        } else {
            self.note_store_ok();
        }
        self.inner.history.push(snap.clone());
        *self
            .inner
            .latest
            .write()
            .unwrap_or_else(|p| p.into_inner()) = snap.clone();
        snap
    }

    async fn write_shared(&self, snap: &UnifiedSnapshot) -> Result<(), StoreError> {
        let body = serde_json::to_string(snap)?;
        self.inner
            .store
            .set_with_ttl(
                &self.inner.opts.keys.latest_snapshot(),
                body,
                self.inner.opts.snapshot_ttl,
            )
            .await
    }

    /// Cross-process read of the latest snapshot from the shared store.
    pub async fn read_shared_latest(&self) -> Result<Option<UnifiedSnapshot>, PipelineError> {
        let raw = self
            .inner
            .store
            .get(&self.inner.opts.keys.latest_snapshot())
            .await?;
        match raw {
            Some(s) => Ok(Some(serde_json::from_str(&s).map_err(StoreError::from)?)),
            None => Ok(None),
        }
    }

    /// Seed the in-process tier from the store (e.g. after a restart).
    /// The startup placeholder is always replaced; a published snapshot only by a newer one.
    pub async fn warm_start(&self) -> bool {
        match self.read_shared_latest().await {
            Ok(Some(snap)) => {
                let placeholder = self.inner.history.is_empty();
                if !placeholder && snap.generated_at <= self.latest().generated_at {
                    return false;
                }
                tracing::info!(
                    target: "cache",
                    generated_at = %snap.generated_at,
                    quality = snap.quality.as_str(),
                    "warm start from shared store"
                );
                let snap = Arc::new(snap);
                self.inner.history.push(snap.clone());
                *self
                    .inner
                    .latest
                    .write()
                    .unwrap_or_else(|p| p.into_inner()) = snap;
                true
            }
            Ok(None) => false,
            Err(e) => {
                tracing::warn!(target: "cache", error = %e, "warm start skipped");
                false
            }
        }
    }

    /// Remember a live record as last-known-good for its source.
    pub async fn remember_record(&self, record: &ProviderRecord) {
        self.inner
            .last_good
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(record.source_id.clone(), record.clone());

        let key = self.inner.opts.keys.source_record(&record.source_id);
        let res = match serde_json::to_string(record) {
            Ok(body) => {
                self.inner
                    .store
                    .set_with_ttl(&key, body, self.inner.opts.record_ttl)
                    .await
            }
            Err(e) => Err(e.into()),
        };
        match res {
            Ok(()) => self.note_store_ok(),
            Err(e) => self.note_store_error(&e, "record write"),
        }
    }

    /// Last-known-good record for `source_id`: shared store first, then the local mirror.
    /// The mirror also covers records written while the store was down. Expired records
    /// are never returned.
    pub async fn last_good_record(&self, source_id: &str) -> Option<ProviderRecord> {
        let key = self.inner.opts.keys.source_record(source_id);
        match self.inner.store.get(&key).await {
            Ok(Some(raw)) => match serde_json::from_str::<ProviderRecord>(&raw) {
                Ok(rec) => return Some(rec),
                Err(e) => {
                    tracing::warn!(target: "cache", source = source_id, error = %e, "undecodable cached record");
                }
            },
            Ok(None) => {}
            Err(e) => self.note_store_error(&e, "record read"),
        }
        let ttl = chrono::Duration::from_std(self.inner.opts.record_ttl).ok()?;
        let g = self
            .inner
            .last_good
            .read()
            .unwrap_or_else(|p| p.into_inner());
        g.get(source_id)
            .filter(|r| Utc::now() - r.collected_at <= ttl)
            .cloned()
    }

    fn note_store_error(&self, e: &StoreError, op: &'static str) {
        counter!("cache_store_errors_total").increment(1);
        let was_degraded = self.inner.store_degraded.swap(true, Ordering::Relaxed);
        if !was_degraded {
            tracing::warn!(
                target: "cache",
                event = "cache_degraded",
                store = self.inner.store.name(),
                op,
                error = %e,
                "shared store unavailable; serving in-process tier"
            );
        } else {
            tracing::debug!(target: "cache", op, error = %e, "shared store still unavailable");
        }
    }

    fn note_store_ok(&self) {
        if self.inner.store_degraded.swap(false, Ordering::Relaxed) {
            tracing::info!(target: "cache", store = self.inner.store.name(), "shared store recovered");
        }
    }
}

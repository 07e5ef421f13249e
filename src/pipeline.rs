//! # Pipeline
//! The one object handed to every consumer: scheduler → processor → cache → hub.
//!
//! Constructed once at startup and shared by handle (`Clone` is an `Arc` bump).
//! Cycles are serialized: the periodic driver and `force_refresh` never overlap.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use once_cell::sync::OnceCell;
use tokio::sync::Mutex;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::MissedTickBehavior;

use crate::cache::{CacheOptions, SnapshotCache};
use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::hub::{Channel, DistributionHub, Subscription};
use crate::ingest::registry::CollectorRegistry;
use crate::ingest::resilience::ResilienceWrapper;
use crate::ingest::scheduler::{CollectorHealth, Scheduler};
use crate::processor;
use crate::snapshot::{QualityLevel, UnifiedSnapshot};
use crate::store::{SharedStore, StoreKeys};

/// Slack added on top of the slowest collector's worst-case bound.
const FORCE_REFRESH_SLACK: Duration = Duration::from_secs(5);

fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        crate::ingest::ensure_metrics_described();
        describe_counter!("pipeline_cycles_total", "Completed collection cycles.");
        describe_counter!(
            "pipeline_force_refresh_coalesced_total",
            "Force refreshes that joined an in-flight forced cycle."
        );
        describe_histogram!("pipeline_cycle_duration_ms", "Cycle wall clock in milliseconds.");
        describe_counter!("snapshot_published_total", "Snapshots published, by quality.");
        describe_gauge!(
            "snapshot_last_generated_ts",
            "Unix ts of the latest published snapshot."
        );
        describe_counter!("merge_dropped_entries_total", "Entries rejected by validation.");
        describe_counter!("cache_store_errors_total", "Shared store read/write failures.");
        describe_gauge!("hub_subscribers", "Live in-process subscriptions.");
        describe_counter!("hub_dropped_total", "Events evicted from slow subscriber queues.");
    });
}

type SharedCycle = Shared<BoxFuture<'static, Option<Arc<UnifiedSnapshot>>>>;

/// A spawned forced cycle that any number of callers can await.
struct ForcedCycle {
    task: AbortHandle,
    result: SharedCycle,
}

#[derive(Clone)]
pub struct Pipeline {
    inner: Arc<Inner>,
}

struct Inner {
    config: PipelineConfig,
    scheduler: Scheduler,
    cache: SnapshotCache,
    hub: DistributionHub,
    cycle_lock: Mutex<()>,
    force_timeout: Duration,
    forced: std::sync::Mutex<Option<ForcedCycle>>,
}

impl Pipeline {
    pub fn new(config: PipelineConfig, registry: CollectorRegistry, store: Arc<dyn SharedStore>) -> Self {
        ensure_metrics_described();
        let now = Utc::now();
        let keys = StoreKeys::new(config.store.key_prefix.clone());
        let cache = SnapshotCache::new(
            store.clone(),
            CacheOptions {
                history_capacity: config.history_capacity,
                snapshot_ttl: config.snapshot_ttl(),
                record_ttl: config.record_ttl(),
                keys: keys.clone(),
            },
            processor::startup_placeholder(&config.bounds, now),
        );
        let force_timeout = config
            .force_refresh_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or_else(|| registry.slowest_worst_case() + FORCE_REFRESH_SLACK);
        let hub = DistributionHub::new(store, keys, config.subscriber_queue_capacity);
        let scheduler = Scheduler::new(
            registry,
            ResilienceWrapper::new(cache.clone()),
            config.bounds,
            config.max_parallel,
            now,
        );
        Self {
            inner: Arc::new(Inner {
                config,
                scheduler,
                cache,
                hub,
                cycle_lock: Mutex::new(()),
                force_timeout,
                forced: std::sync::Mutex::new(None),
            }),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> &SnapshotCache {
        &self.inner.cache
    }

    pub fn hub(&self) -> &DistributionHub {
        &self.inner.hub
    }

    pub fn force_refresh_timeout(&self) -> Duration {
        self.inner.force_timeout
    }

    /// Latest snapshot or the startup placeholder. Never touches the network.
    pub fn latest_snapshot(&self) -> Arc<UnifiedSnapshot> {
        self.inner.cache.latest()
    }

    pub fn history(&self, limit: usize) -> Vec<Arc<UnifiedSnapshot>> {
        self.inner.cache.history(limit)
    }

    pub fn history_since(&self, ts: DateTime<Utc>) -> Vec<Arc<UnifiedSnapshot>> {
        self.inner.cache.history_since(ts)
    }

    pub fn subscribe(&self, channel: Channel) -> Subscription {
        self.inner.hub.subscribe(channel)
    }

    pub fn unsubscribe(&self, sub: &Subscription) -> bool {
        self.inner.hub.unsubscribe(sub)
    }

    pub async fn collector_health(&self) -> BTreeMap<String, CollectorHealth> {
        self.inner.scheduler.health().await
    }

    /// Adopt a newer snapshot from the shared store, if any.
    pub async fn warm_start(&self) -> bool {
        self.inner.cache.warm_start().await
    }

    /// Run one cycle and publish its snapshot. `force` ignores due times.
    pub async fn run_cycle(&self, force: bool) -> Arc<UnifiedSnapshot> {
        let _guard = self.inner.cycle_lock.lock().await;
        let t0 = Instant::now();
        let started_at = Utc::now();
        let scheduler = &self.inner.scheduler;

        tracing::info!(
            target: "pipeline",
            event = "cycle_started",
            force,
            collectors = scheduler.registry().len(),
            "cycle started"
        );

        let report = scheduler.run_cycle(started_at, force).await;
        let generated_at = self.next_generated_at(Utc::now());
        let outcome = processor::merge(&report.records, &self.inner.config.bounds, generated_at);
        let snapshot = outcome.snapshot;

        if snapshot.quality == QualityLevel::Fallback && !scheduler.registry().is_empty() {
            let err = PipelineError::AllSourcesFailed(scheduler.registry().len());
            tracing::warn!(
                target: "pipeline",
                event = "all_sources_failed",
                error = %err,
                "publishing fully synthetic snapshot"
            );
        }

        let quality = snapshot.quality;
        let snap = self.inner.cache.put(snapshot).await;
        let published = self.inner.hub.publish(&snap).await;

        let elapsed_ms = t0.elapsed().as_secs_f64() * 1_000.0;
        counter!("pipeline_cycles_total").increment(1);
        histogram!("pipeline_cycle_duration_ms").record(elapsed_ms);
        counter!("snapshot_published_total", "quality" => quality.as_str()).increment(1);
        gauge!("snapshot_last_generated_ts").set(snap.generated_at.timestamp() as f64);

        tracing::info!(
            target: "pipeline",
            event = "snapshot_published",
            generated_at = %snap.generated_at,
            quality = quality.as_str(),
            fires = snap.fires.len(),
            refreshed = report.refreshed.len(),
            live = report.live.len(),
            from_cache = report.from_cache.len(),
            synthetic = report.synthetic.len(),
            dropped = outcome.dropped.len(),
            delivered = published.delivered,
            elapsed_ms,
            "snapshot published"
        );
        snap
    }

    /// Out-of-band cycle ignoring due times. Waits at most the force-refresh timeout;
    /// on timeout the cycle keeps running in the background and the current latest is returned.
    /// Callers arriving while a forced cycle is in flight await that cycle instead of queueing another.
    pub async fn force_refresh(&self) -> Arc<UnifiedSnapshot> {
        let cycle = self.forced_cycle();
        match tokio::time::timeout(self.inner.force_timeout, cycle).await {
            Ok(Some(snap)) => snap,
            Ok(None) => self.latest_snapshot(),
            Err(_) => {
                tracing::warn!(
                    target: "pipeline",
                    timeout_ms = self.inner.force_timeout.as_millis() as u64,
                    "force refresh timed out; serving latest snapshot"
                );
                self.latest_snapshot()
            }
        }
    }

    fn forced_cycle(&self) -> SharedCycle {
        let mut slot = self.inner.forced.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(inflight) = slot.as_ref().filter(|c| !c.task.is_finished()) {
            counter!("pipeline_force_refresh_coalesced_total").increment(1);
            return inflight.result.clone();
        }

        let this = self.clone();
        let handle = tokio::spawn(async move { this.run_cycle(true).await });
        let task = handle.abort_handle();
        let result = handle
            .map(|res| match res {
                Ok(snap) => Some(snap),
                Err(e) => {
                    tracing::error!(target: "pipeline", error = %e, "forced cycle task failed");
                    None
                }
            })
            .boxed()
            .shared();
        *slot = Some(ForcedCycle {
            task,
            result: result.clone(),
        });
        result
    }

    /// One driver tick: runs a cycle only when some collector is due.
    pub async fn tick(&self) -> Option<Arc<UnifiedSnapshot>> {
        if self.inner.scheduler.due_collectors(Utc::now()).await.is_empty() {
            return None;
        }
        Some(self.run_cycle(false).await)
    }

    /// Periodic driver. Abort the handle to stop it.
    pub fn spawn_driver(&self) -> JoinHandle<()> {
        let this = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(this.inner.config.tick());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                this.tick().await;
            }
        })
    }

    /// `generated_at` must strictly increase across published snapshots.
    fn next_generated_at(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let prev = self.inner.cache.latest().generated_at;
        if now > prev {
            now
        } else {
            prev + chrono::Duration::milliseconds(1)
        }
    }
}

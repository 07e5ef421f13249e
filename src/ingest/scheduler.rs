// src/ingest/scheduler.rs
//! Per-collector state machine `Idle → Due → InFlight → {Succeeded, Failed} → Idle`.
//!
//! Each cycle launches every due collector through the resilience wrapper with
//! bounded parallelism and waits for all of them to settle. Collectors that are
//! not due contribute their most recent record unchanged.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::ingest::registry::{CollectorRegistry, RegisteredCollector};
use crate::ingest::resilience::{CallOutcome, RecordOrigin, ResilienceWrapper};
use crate::ingest::types::{BoundingBox, ProviderRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectorPhase {
    Idle,
    Due,
    InFlight,
    Succeeded,
    Failed,
}

/// Bookkeeping owned by the scheduler; only mutated once an attempt settles.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectorState {
    pub last_success_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub next_due_at: DateTime<Utc>,
    pub refresh_interval_secs: u64,
    pub phase: CollectorPhase,
}

impl CollectorState {
    fn new(interval: Duration, now: DateTime<Utc>) -> Self {
        Self {
            last_success_at: None,
            consecutive_failures: 0,
            next_due_at: now,
            refresh_interval_secs: interval.as_secs(),
            phase: CollectorPhase::Idle,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_due_at <= now
    }

    fn settle(&mut self, outcome: &CallOutcome, started_at: DateTime<Utc>) {
        if outcome.is_live() {
            self.last_success_at = Some(started_at);
            self.consecutive_failures = 0;
            self.next_due_at = started_at + chrono::Duration::seconds(self.refresh_interval_secs as i64);
            self.phase = CollectorPhase::Succeeded;
        } else {
            // Stays due until a live collection succeeds.
            self.consecutive_failures = self.consecutive_failures.saturating_add(1);
            self.phase = CollectorPhase::Failed;
        }
    }
}

/// What one cycle produced.
#[derive(Debug, Clone)]
pub struct CycleReport {
    /// Exactly one record per registered collector.
    pub records: BTreeMap<String, ProviderRecord>,
    pub refreshed: Vec<String>,
    pub live: Vec<String>,
    pub from_cache: Vec<String>,
    pub synthetic: Vec<String>,
    pub started_at: DateTime<Utc>,
}

pub struct Scheduler {
    registry: CollectorRegistry,
    wrapper: ResilienceWrapper,
    bounds: BoundingBox,
    max_parallel: usize,
    states: Mutex<HashMap<String, CollectorState>>,
    latest: Mutex<BTreeMap<String, ProviderRecord>>,
}

impl Scheduler {
    pub fn new(
        registry: CollectorRegistry,
        wrapper: ResilienceWrapper,
        bounds: BoundingBox,
        max_parallel: usize,
        now: DateTime<Utc>,
    ) -> Self {
        let states = registry
            .iter()
            .map(|e| {
                (
                    e.source_id().to_string(),
                    CollectorState::new(e.policy.refresh_interval, now),
                )
            })
            .collect();
        Self {
            registry,
            wrapper,
            bounds,
            max_parallel: max_parallel.max(1),
            states: Mutex::new(states),
            latest: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn registry(&self) -> &CollectorRegistry {
        &self.registry
    }

    /// Source ids whose `next_due_at <= now`, in registration order.
    pub async fn due_collectors(&self, now: DateTime<Utc>) -> Vec<String> {
        let states = self.states.lock().await;
        self.registry
            .iter()
            .filter(|e| states.get(e.source_id()).map_or(true, |s| s.is_due(now)))
            .map(|e| e.source_id().to_string())
            .collect()
    }

    pub async fn states(&self) -> HashMap<String, CollectorState> {
        self.states.lock().await.clone()
    }

    /// Run one cycle at `now`. With `force`, every collector is launched regardless of due time.
    pub async fn run_cycle(&self, now: DateTime<Utc>, force: bool) -> CycleReport {
        let previous = self.latest.lock().await.clone();

        let due: Vec<RegisteredCollector> = {
            let mut states = self.states.lock().await;
            let mut due = Vec::new();
            for entry in self.registry.iter() {
                let id = entry.source_id();
                let st = states
                    .entry(id.to_string())
                    .or_insert_with(|| CollectorState::new(entry.policy.refresh_interval, now));
                // A collector without any record yet must run, or the merge would miss it.
                if force || st.is_due(now) || !previous.contains_key(id) {
                    st.phase = CollectorPhase::Due;
                    due.push(entry.clone());
                }
            }
            for entry in &due {
                if let Some(st) = states.get_mut(entry.source_id()) {
                    st.phase = CollectorPhase::InFlight;
                }
            }
            due
        };

        let bounds = self.bounds;
        let outcomes: Vec<(String, CallOutcome)> = stream::iter(due.into_iter().map(|entry| {
            let wrapper = self.wrapper.clone();
            async move {
                let outcome = wrapper.call(&entry, &bounds).await;
                (entry.source_id().to_string(), outcome)
            }
        }))
        .buffer_unordered(self.max_parallel)
        .collect()
        .await;

        let mut report = CycleReport {
            records: previous,
            refreshed: Vec::with_capacity(outcomes.len()),
            live: Vec::new(),
            from_cache: Vec::new(),
            synthetic: Vec::new(),
            started_at: now,
        };

        {
            let mut states = self.states.lock().await;
            for (id, outcome) in &outcomes {
                if let Some(st) = states.get_mut(id) {
                    st.settle(outcome, now);
                }
                match outcome.origin {
                    RecordOrigin::Live => report.live.push(id.clone()),
                    RecordOrigin::Cache => report.from_cache.push(id.clone()),
                    RecordOrigin::Synthetic => report.synthetic.push(id.clone()),
                }
                report.refreshed.push(id.clone());
            }
            for st in states.values_mut() {
                st.phase = CollectorPhase::Idle;
            }
        }

        for (id, outcome) in outcomes {
            report.records.insert(id, outcome.record);
        }
        report.refreshed.sort();
        report.live.sort();
        report.from_cache.sort();
        report.synthetic.sort();

        *self.latest.lock().await = report.records.clone();
        report
    }
}

/// Health as reported to external readiness checks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectorHealth {
    pub healthy: bool,
    pub last_success_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
    pub next_due_at: DateTime<Utc>,
    pub refresh_interval_secs: u64,
}

impl Scheduler {
    pub async fn health(&self) -> BTreeMap<String, CollectorHealth> {
        let states = self.states.lock().await;
        self.registry
            .iter()
            .filter_map(|e| {
                let st = states.get(e.source_id())?;
                Some((
                    e.source_id().to_string(),
                    CollectorHealth {
                        healthy: e.collector.is_healthy() && st.consecutive_failures == 0,
                        last_success_at: st.last_success_at,
                        consecutive_failures: st.consecutive_failures,
                        next_due_at: st.next_due_at,
                        refresh_interval_secs: st.refresh_interval_secs,
                    },
                ))
            })
            .collect()
    }
}

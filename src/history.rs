//! history.rs: bounded in-memory ring of recent snapshots, oldest first.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use crate::snapshot::UnifiedSnapshot;

pub const MAX_CAPACITY: usize = 10_000;

#[derive(Debug)]
pub struct SnapshotHistory {
    inner: Mutex<VecDeque<Arc<UnifiedSnapshot>>>,
    cap: usize,
}

impl SnapshotHistory {
    pub fn with_capacity(cap: usize) -> Self {
        let cap = cap.clamp(1, MAX_CAPACITY);
        Self {
            inner: Mutex::new(VecDeque::with_capacity(cap)),
            cap,
        }
    }

    /// Append; entries older than `generated_at` of the newest are rejected so
    /// readers always see a non-decreasing sequence.
    pub fn push(&self, snap: Arc<UnifiedSnapshot>) -> bool {
        let mut v = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(last) = v.back() {
            if snap.generated_at < last.generated_at {
                return false;
            }
        }
        v.push_back(snap);
        while v.len() > self.cap {
            v.pop_front();
        }
        true
    }

    pub fn snapshot_last_n(&self, n: usize) -> Vec<Arc<UnifiedSnapshot>> {
        let v = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        let start = v.len().saturating_sub(n);
        v.iter().skip(start).cloned().collect()
    }

    /// Snapshots generated strictly after `ts`.
    pub fn since(&self, ts: DateTime<Utc>) -> Vec<Arc<UnifiedSnapshot>> {
        let v = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        v.iter().filter(|s| s.generated_at > ts).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.cap
    }
}

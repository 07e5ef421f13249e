// src/ingest/registry.rs
use std::sync::Arc;
use std::time::Duration;

use crate::config::CollectorConfig;
use crate::ingest::types::SourceCollector;

/// Timeout + bounded exponential backoff, applied identically to every collector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
}

impl RetryPolicy {
    /// Delay after the `failed_attempt`-th failure (0-based): `min(base * 2^k, cap)`.
    pub fn backoff_for(&self, failed_attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(failed_attempt).unwrap_or(u32::MAX);
        self.backoff_base
            .checked_mul(factor)
            .unwrap_or(self.backoff_cap)
            .min(self.backoff_cap)
    }

    /// Upper bound on wall clock for one wrapped call:
    /// `max_attempts * timeout + sum(backoff_for(k) for k in 0..max_attempts-1)`.
    pub fn worst_case_duration(&self) -> Duration {
        let attempts = self.max_attempts.max(1);
        let timeouts = self.timeout.saturating_mul(attempts);
        (0..attempts - 1).fold(timeouts, |acc, k| acc.saturating_add(self.backoff_for(k)))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            timeout: Duration::from_secs(30),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CollectorPolicy {
    pub refresh_interval: Duration,
    pub retry: RetryPolicy,
}

impl CollectorPolicy {
    pub fn every(refresh_interval: Duration) -> Self {
        Self {
            refresh_interval,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl From<&CollectorConfig> for CollectorPolicy {
    fn from(c: &CollectorConfig) -> Self {
        Self {
            refresh_interval: c.refresh_interval(),
            retry: RetryPolicy {
                max_attempts: c.max_attempts,
                timeout: Duration::from_secs(c.timeout_secs),
                backoff_base: Duration::from_millis(c.backoff_base_ms),
                backoff_cap: Duration::from_millis(c.backoff_cap_ms),
            },
        }
    }
}

#[derive(Clone)]
pub struct RegisteredCollector {
    pub collector: Arc<dyn SourceCollector>,
    pub policy: CollectorPolicy,
}

impl RegisteredCollector {
    pub fn source_id(&self) -> &str {
        self.collector.source_id()
    }
}

/// The fixed set of collectors a pipeline runs, in registration order.
#[derive(Clone, Default)]
pub struct CollectorRegistry {
    entries: Vec<RegisteredCollector>,
}

impl CollectorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a collector. A second registration with the same source id replaces the first.
    pub fn register(&mut self, collector: Arc<dyn SourceCollector>, policy: CollectorPolicy) {
        let entry = RegisteredCollector { collector, policy };
        if let Some(slot) = self
            .entries
            .iter_mut()
            .find(|e| e.source_id() == entry.source_id())
        {
            tracing::warn!(target: "ingest", source = entry.source_id(), "collector re-registered; replacing");
            *slot = entry;
        } else {
            self.entries.push(entry);
        }
    }

    pub fn with(mut self, collector: Arc<dyn SourceCollector>, policy: CollectorPolicy) -> Self {
        self.register(collector, policy);
        self
    }

    pub fn get(&self, source_id: &str) -> Option<&RegisteredCollector> {
        self.entries.iter().find(|e| e.source_id() == source_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredCollector> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Largest worst-case retry bound among registered collectors.
    pub fn slowest_worst_case(&self) -> Duration {
        self.entries
            .iter()
            .map(|e| e.policy.retry.worst_case_duration())
            .max()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_and_caps() {
        let p = RetryPolicy {
            max_attempts: 10,
            timeout: Duration::from_secs(1),
            backoff_base: Duration::from_millis(500),
            backoff_cap: Duration::from_secs(3),
        };
        assert_eq!(p.backoff_for(0), Duration::from_millis(500));
        assert_eq!(p.backoff_for(1), Duration::from_millis(1_000));
        assert_eq!(p.backoff_for(2), Duration::from_millis(2_000));
        assert_eq!(p.backoff_for(3), Duration::from_secs(3));
        assert_eq!(p.backoff_for(40), Duration::from_secs(3));
    }

    #[test]
    fn worst_case_for_defaults() {
        // 3 x 30s + (1s + 2s)
        assert_eq!(
            RetryPolicy::default().worst_case_duration(),
            Duration::from_secs(93)
        );
    }

    #[test]
    fn single_attempt_has_no_backoff() {
        let p = RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        };
        assert_eq!(p.worst_case_duration(), Duration::from_secs(30));
    }
}

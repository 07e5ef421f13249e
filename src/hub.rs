//! # Distribution Hub
//! Fans each published snapshot out to:
//! - the shared store's pub/sub channels (other processes), and
//! - in-process subscription queues, one per live consumer.
//!
//! In-process queues are bounded and drop their oldest entry when full, so a
//! slow consumer never stalls the publisher.

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use metrics::{counter, gauge};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use crate::snapshot::{FiresEvent, UnifiedSnapshot, WeatherEvent};
use crate::store::{SharedStore, StoreKeys};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Fires,
    Weather,
    All,
}

impl Channel {
    pub const ALL_CHANNELS: [Channel; 3] = [Channel::Fires, Channel::Weather, Channel::All];

    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Fires => "fires",
            Channel::Weather => "weather",
            Channel::All => "all",
        }
    }

    /// Does `next` produce an event on this channel, given the previously published snapshot?
    pub fn matches(&self, prev: Option<&UnifiedSnapshot>, next: &UnifiedSnapshot) -> bool {
        match (self, prev) {
            (Channel::All, _) | (_, None) => true,
            (Channel::Fires, Some(p)) => p.fires != next.fires,
            (Channel::Weather, Some(p)) => p.weather != next.weather,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownChannel(pub String);

impl fmt::Display for UnknownChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown channel '{}' (expected fires|weather|all)", self.0)
    }
}

impl std::error::Error for UnknownChannel {}

impl FromStr for Channel {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fires" => Ok(Channel::Fires),
            "weather" => Ok(Channel::Weather),
            "all" => Ok(Channel::All),
            other => Err(UnknownChannel(other.to_string())),
        }
    }
}

/// Per-subscriber bounded queue.
#[derive(Debug)]
struct SubscriberQueue {
    buf: Mutex<VecDeque<Arc<UnifiedSnapshot>>>,
    capacity: usize,
    notify: Notify,
    closed: AtomicBool,
    dropped: AtomicU64,
}

impl SubscriberQueue {
    fn new(capacity: usize) -> Self {
        Self {
            buf: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// Non-blocking enqueue. Returns true if an old entry was evicted.
    fn push(&self, snap: Arc<UnifiedSnapshot>) -> bool {
        let evicted = {
            let mut q = self.buf.lock().unwrap_or_else(|p| p.into_inner());
            let evicted = if q.len() >= self.capacity {
                q.pop_front();
                true
            } else {
                false
            };
            q.push_back(snap);
            evicted
        };
        if evicted {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        self.notify.notify_one();
        evicted
    }

    fn pop(&self) -> Option<Arc<UnifiedSnapshot>> {
        self.buf
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }
}

struct Slot {
    channel: Channel,
    queue: Arc<SubscriberQueue>,
}

struct HubInner {
    subscribers: Mutex<HashMap<u64, Slot>>,
    next_id: AtomicU64,
    queue_capacity: usize,
    store: Arc<dyn SharedStore>,
    keys: StoreKeys,
    last_published: Mutex<Option<Arc<UnifiedSnapshot>>>,
}

impl HubInner {
    fn remove(&self, id: u64) -> bool {
        let removed = {
            let mut g = self.subscribers.lock().unwrap_or_else(|p| p.into_inner());
            let removed = g.remove(&id);
            gauge!("hub_subscribers").set(g.len() as f64);
            removed
        };
        match removed {
            Some(slot) => {
                slot.queue.close();
                tracing::debug!(target: "hub", id, channel = %slot.channel, "unsubscribed");
                true
            }
            None => false,
        }
    }
}

/// Counts from one publish call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub evicted: usize,
    pub external_receivers: usize,
    pub external_failures: usize,
}

#[derive(Clone)]
pub struct DistributionHub {
    inner: Arc<HubInner>,
}

impl DistributionHub {
    pub fn new(store: Arc<dyn SharedStore>, keys: StoreKeys, queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                subscribers: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                queue_capacity: queue_capacity.max(1),
                store,
                keys,
                last_published: Mutex::new(None),
            }),
        }
    }

    /// Register a consumer. It only sees snapshots published after this call.
    pub fn subscribe(&self, channel: Channel) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let queue = Arc::new(SubscriberQueue::new(self.inner.queue_capacity));
        {
            let mut g = self
                .inner
                .subscribers
                .lock()
                .unwrap_or_else(|p| p.into_inner());
            g.insert(
                id,
                Slot {
                    channel,
                    queue: queue.clone(),
                },
            );
            gauge!("hub_subscribers").set(g.len() as f64);
        }
        tracing::debug!(target: "hub", id, %channel, "subscribed");
        Subscription {
            id,
            channel,
            queue,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Idempotent; returns whether the subscription was still live.
    pub fn unsubscribe(&self, sub: &Subscription) -> bool {
        self.inner.remove(sub.id)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner
            .subscribers
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .len()
    }

    pub async fn publish(&self, snap: &Arc<UnifiedSnapshot>) -> PublishReport {
        let prev = {
            let mut g = self
                .inner
                .last_published
                .lock()
                .unwrap_or_else(|p| p.into_inner());
            g.replace(snap.clone())
        };
        let prev = prev.as_deref();

        let mut report = PublishReport::default();
        {
            let g = self
                .inner
                .subscribers
                .lock()
                .unwrap_or_else(|p| p.into_inner());
            for slot in g.values() {
                if !slot.channel.matches(prev, snap) {
                    continue;
                }
                if slot.queue.push(snap.clone()) {
                    report.evicted += 1;
                }
                report.delivered += 1;
            }
        }
        if report.evicted > 0 {
            counter!("hub_dropped_total").increment(report.evicted as u64);
        }

        for channel in Channel::ALL_CHANNELS {
            if !channel.matches(prev, snap) {
                continue;
            }
            let body = match encode_event(channel, snap) {
                Ok(b) => b,
                Err(e) => {
                    tracing::warn!(target: "hub", %channel, error = %e, "event encode failed");
                    report.external_failures += 1;
                    continue;
                }
            };
            match self
                .inner
                .store
                .publish(&self.inner.keys.channel(channel), body)
                .await
            {
                Ok(n) => report.external_receivers += n,
                Err(e) => {
                    report.external_failures += 1;
                    tracing::warn!(target: "hub", %channel, error = %e, "external publish failed");
                }
            }
        }
        report
    }
}

fn encode_event(channel: Channel, snap: &UnifiedSnapshot) -> serde_json::Result<String> {
    match channel {
        Channel::All => serde_json::to_string(snap),
        Channel::Fires => serde_json::to_string(&FiresEvent {
            generated_at: snap.generated_at,
            quality: snap.quality,
            fires: &snap.fires,
        }),
        Channel::Weather => serde_json::to_string(&WeatherEvent {
            generated_at: snap.generated_at,
            quality: snap.quality,
            weather: &snap.weather,
            derived: &snap.derived,
        }),
    }
}

/// A live consumer's handle. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    channel: Channel,
    queue: Arc<SubscriberQueue>,
    hub: Weak<HubInner>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn channel(&self) -> Channel {
        self.channel
    }

    /// Next snapshot; `None` once unsubscribed and drained.
    pub async fn recv(&self) -> Option<Arc<UnifiedSnapshot>> {
        loop {
            if let Some(s) = self.queue.pop() {
                return Some(s);
            }
            if self.queue.closed.load(Ordering::SeqCst) {
                return None;
            }
            self.queue.notify.notified().await;
        }
    }

    pub fn try_recv(&self) -> Option<Arc<UnifiedSnapshot>> {
        self.queue.pop()
    }

    /// Entries evicted from this queue because the consumer fell behind.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.queue.closed.load(Ordering::SeqCst)
    }

    pub fn unsubscribe(self) {
        // Drop does the work.
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("channel", &self.channel)
            .finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_parsing() {
        assert_eq!("Fires".parse::<Channel>().unwrap(), Channel::Fires);
        assert_eq!(" all ".parse::<Channel>().unwrap(), Channel::All);
        assert!("terrain".parse::<Channel>().is_err());
    }
}

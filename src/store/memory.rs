// src/store/memory.rs
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::Instant;

use super::SharedStore;
use crate::error::StoreError;

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug)]
struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-process stand-in for the external store: TTL'd keys plus broadcast channels.
///
/// `set_available(false)` makes every call fail with `StoreError::Unavailable`,
/// which is how outages are exercised.
#[derive(Debug)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
    channels: Mutex<HashMap<String, broadcast::Sender<String>>>,
    available: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            channels: Mutex::new(HashMap::new()),
            available: AtomicBool::new(true),
        }
    }

    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Listen on a channel the way another process would.
    pub fn subscribe_channel(&self, channel: &str) -> broadcast::Receiver<String> {
        let mut g = self.channels.lock().unwrap_or_else(|p| p.into_inner());
        g.entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub fn len(&self) -> usize {
        let now = Instant::now();
        let g = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        g.values().filter(|e| e.expires_at > now).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("memory store offline".into()))
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl SharedStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.check()?;
        let mut g = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        match g.get(key) {
            Some(e) if e.expires_at > Instant::now() => Ok(Some(e.value.clone())),
            Some(_) => {
                g.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        self.check()?;
        let mut g = self.entries.lock().unwrap_or_else(|p| p.into_inner());
        g.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn publish(&self, channel: &str, message: String) -> Result<usize, StoreError> {
        self.check()?;
        let g = self.channels.lock().unwrap_or_else(|p| p.into_inner());
        // No receivers is not an error.
        Ok(g.get(channel)
            .map(|tx| tx.send(message).unwrap_or(0))
            .unwrap_or(0))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn keys_expire_after_ttl() {
        let s = MemoryStore::new();
        s.set_with_ttl("k", "v".into(), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(s.get("k").await.unwrap().as_deref(), Some("v"));
        tokio::time::advance(Duration::from_secs(11)).await;
        assert_eq!(s.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn offline_store_errors() {
        let s = MemoryStore::new();
        s.set_available(false);
        assert!(matches!(
            s.get("k").await,
            Err(StoreError::Unavailable(_))
        ));
        s.set_available(true);
        assert!(s.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn publish_reaches_channel_subscribers() {
        let s = MemoryStore::new();
        assert_eq!(s.publish("c", "nobody".into()).await.unwrap(), 0);
        let mut rx = s.subscribe_channel("c");
        assert_eq!(s.publish("c", "hello".into()).await.unwrap(), 1);
        assert_eq!(rx.recv().await.unwrap(), "hello");
    }
}

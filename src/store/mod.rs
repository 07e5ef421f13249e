// src/store/mod.rs
//! External shared key-value store seam.
//!
//! The pipeline only needs three verbs: read a key, write a key with a TTL,
//! and broadcast on a named channel. Values are whole serialized documents,
//! so a reader never observes a partial snapshot.

pub mod file;
pub mod memory;

use std::time::Duration;

use crate::error::StoreError;
use crate::hub::Channel;

pub use file::FileStore;
pub use memory::MemoryStore;

#[async_trait::async_trait]
pub trait SharedStore: Send + Sync {
    /// Returns `Ok(None)` for missing or expired keys.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Atomically replace `key`; last writer wins.
    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError>;

    /// Broadcast `message`; returns the number of receivers reached, when known.
    async fn publish(&self, channel: &str, message: String) -> Result<usize, StoreError>;

    fn name(&self) -> &'static str;
}

/// Key layout inside the shared store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreKeys {
    prefix: String,
}

impl StoreKeys {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn latest_snapshot(&self) -> String {
        format!("{}:snapshot:latest", self.prefix)
    }

    pub fn source_record(&self, source_id: &str) -> String {
        format!("{}:source:{}", self.prefix, source_id)
    }

    pub fn channel(&self, channel: Channel) -> String {
        format!("{}:channel:{}", self.prefix, channel.as_str())
    }
}

impl Default for StoreKeys {
    fn default() -> Self {
        Self::new("wildfire")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout() {
        let k = StoreKeys::new("wf");
        assert_eq!(k.latest_snapshot(), "wf:snapshot:latest");
        assert_eq!(k.source_record("firms"), "wf:source:firms");
        assert_eq!(k.channel(Channel::Fires), "wf:channel:fires");
        assert_eq!(k.channel(Channel::All), "wf:channel:all");
    }
}

// src/store/file.rs
//! File-backed store: one JSON envelope per key, written tmp + rename so a
//! concurrent reader (same or other process) sees either the old or the new
//! document, never a torn one.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::fs;

use super::SharedStore;
use crate::error::StoreError;

/// Per-process sequence for temp file names.
static TMP_SEQ: AtomicU64 = AtomicU64::new(0);

#[derive(Debug, Serialize, Deserialize)]
struct Envelope {
    expires_at_ms: i64,
    value: String,
}

#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Best-effort creates `dir`; failures surface on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        let _ = std::fs::create_dir_all(dir.join("channels"));
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{}.json", file_safe(key)))
    }

    fn channel_path(&self, channel: &str) -> PathBuf {
        self.dir
            .join("channels")
            .join(format!("{}.json", file_safe(channel)))
    }

    async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = tmp_path(path);
        let res = match fs::write(&tmp, bytes).await {
            Ok(()) => fs::rename(&tmp, path).await,
            Err(e) => Err(e),
        };
        if res.is_err() {
            let _ = fs::remove_file(&tmp).await;
        }
        res.map_err(StoreError::from)
    }
}

/// Unique per writer: processes sharing the directory, and tasks within one, never
/// write into the same temp file.
fn tmp_path(path: &Path) -> PathBuf {
    let seq = TMP_SEQ.fetch_add(1, Ordering::Relaxed);
    path.with_extension(format!("json.{}.{seq}.tmp", std::process::id()))
}

fn file_safe(key: &str) -> String {
    key.chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' => c,
            _ => '_',
        })
        .collect()
}

#[async_trait::async_trait]
impl SharedStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.key_path(key);
        let raw = match fs::read_to_string(&path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let env: Envelope = serde_json::from_str(&raw)?;
        if env.expires_at_ms <= Utc::now().timestamp_millis() {
            let _ = fs::remove_file(&path).await;
            return Ok(None);
        }
        Ok(Some(env.value))
    }

    async fn set_with_ttl(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let env = Envelope {
            expires_at_ms: Utc::now().timestamp_millis().saturating_add(ttl_ms),
            value,
        };
        let bytes = serde_json::to_vec(&env)?;
        Self::write_atomic(&self.key_path(key), &bytes).await
    }

    /// Keeps the latest message per channel in a mailbox file for pollers.
    async fn publish(&self, channel: &str, message: String) -> Result<usize, StoreError> {
        Self::write_atomic(&self.channel_path(channel), message.as_bytes()).await?;
        Ok(0)
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

// src/config/mod.rs
//! Static pipeline configuration, loaded once at startup.
//!
//! Lookup order for [`PipelineConfig::load_default`]:
//! 1) `$WILDFIRE_CONFIG_PATH`
//! 2) `config/pipeline.toml`
//! 3) built-in defaults
//!
//! Env overrides (`WILDFIRE_TICK_SECS`, `WILDFIRE_STORE_DIR`) are applied last.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::ingest::types::BoundingBox;

pub const ENV_CONFIG_PATH: &str = "WILDFIRE_CONFIG_PATH";
pub const ENV_TICK_SECS: &str = "WILDFIRE_TICK_SECS";
pub const ENV_STORE_DIR: &str = "WILDFIRE_STORE_DIR";
pub const ENV_FIRMS_KEY: &str = "FIRMS_MAP_KEY";
pub const DEFAULT_CONFIG_PATH: &str = "config/pipeline.toml";

fn default_tick_secs() -> u64 {
    5
}
fn default_max_parallel() -> usize {
    4
}
fn default_history_capacity() -> usize {
    500
}
fn default_snapshot_ttl_secs() -> u64 {
    900
}
fn default_record_ttl_secs() -> u64 {
    7_200
}
fn default_queue_capacity() -> usize {
    32
}
fn default_key_prefix() -> String {
    "wildfire".to_string()
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    #[serde(default)]
    pub bounds: BoundingBox,
    /// Driver loop period.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
    /// Upper bound on collectors running at once inside a cycle.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,
    #[serde(default = "default_snapshot_ttl_secs")]
    pub snapshot_ttl_secs: u64,
    #[serde(default = "default_record_ttl_secs")]
    pub record_ttl_secs: u64,
    #[serde(default = "default_queue_capacity")]
    pub subscriber_queue_capacity: usize,
    /// If absent, derived from the slowest collector's worst-case retry bound.
    #[serde(default)]
    pub force_refresh_timeout_secs: Option<u64>,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub collectors: CollectorsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreConfig {
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// When set, a file-backed store is used; otherwise an in-memory one.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            dir: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectorsConfig {
    #[serde(default = "CollectorConfig::fires")]
    pub fires: CollectorConfig,
    #[serde(default = "CollectorConfig::weather")]
    pub weather: CollectorConfig,
    #[serde(default = "CollectorConfig::terrain")]
    pub terrain: CollectorConfig,
}

impl Default for CollectorsConfig {
    fn default() -> Self {
        Self {
            fires: CollectorConfig::fires(),
            weather: CollectorConfig::weather(),
            terrain: CollectorConfig::terrain(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CollectorConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Overrides the provider's public endpoint.
    #[serde(default)]
    pub url: Option<String>,
    /// "ENV" means: read from the provider's env var.
    #[serde(default)]
    pub api_key: Option<String>,
    pub refresh_interval_secs: u64,
    #[serde(default = "CollectorConfig::default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "CollectorConfig::default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "CollectorConfig::default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "CollectorConfig::default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
}

impl CollectorConfig {
    fn default_timeout_secs() -> u64 {
        30
    }
    fn default_max_attempts() -> u32 {
        3
    }
    fn default_backoff_base_ms() -> u64 {
        1_000
    }
    fn default_backoff_cap_ms() -> u64 {
        30_000
    }

    pub fn with_interval(refresh_interval_secs: u64) -> Self {
        Self {
            enabled: true,
            url: None,
            api_key: None,
            refresh_interval_secs,
            timeout_secs: Self::default_timeout_secs(),
            max_attempts: Self::default_max_attempts(),
            backoff_base_ms: Self::default_backoff_base_ms(),
            backoff_cap_ms: Self::default_backoff_cap_ms(),
        }
    }

    pub fn fires() -> Self {
        Self::with_interval(300)
    }

    pub fn weather() -> Self {
        Self::with_interval(600)
    }

    pub fn terrain() -> Self {
        Self::with_interval(3_600)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    fn validate(&self, name: &str) -> Result<()> {
        if self.refresh_interval_secs == 0 {
            bail!("collectors.{name}.refresh_interval_secs must be > 0");
        }
        if self.timeout_secs == 0 {
            bail!("collectors.{name}.timeout_secs must be > 0");
        }
        if self.max_attempts == 0 {
            bail!("collectors.{name}.max_attempts must be >= 1");
        }
        if self.backoff_cap_ms < self.backoff_base_ms {
            bail!("collectors.{name}.backoff_cap_ms must be >= backoff_base_ms");
        }
        Ok(())
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            bounds: BoundingBox::default(),
            tick_secs: default_tick_secs(),
            max_parallel: default_max_parallel(),
            history_capacity: default_history_capacity(),
            snapshot_ttl_secs: default_snapshot_ttl_secs(),
            record_ttl_secs: default_record_ttl_secs(),
            subscriber_queue_capacity: default_queue_capacity(),
            force_refresh_timeout_secs: None,
            store: StoreConfig::default(),
            collectors: CollectorsConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Parse, resolve secrets and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut cfg: PipelineConfig = toml::from_str(s).context("parsing pipeline config")?;
        cfg.resolve_api_keys()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config from {}", path.display()))?;
        Self::from_toml_str(&data)
    }

    pub fn load_default() -> Result<Self> {
        let mut cfg = if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
            let pb = PathBuf::from(p);
            if !pb.exists() {
                return Err(anyhow!("{ENV_CONFIG_PATH} points to non-existent path"));
            }
            Self::load_from_file(&pb)?
        } else if Path::new(DEFAULT_CONFIG_PATH).exists() {
            Self::load_from_file(DEFAULT_CONFIG_PATH)?
        } else {
            Self::default()
        };
        cfg.apply_env_overrides()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(v) = std::env::var(ENV_TICK_SECS) {
            self.tick_secs = v
                .trim()
                .parse()
                .with_context(|| format!("{ENV_TICK_SECS}={v} is not an integer"))?;
        }
        if let Ok(v) = std::env::var(ENV_STORE_DIR) {
            if !v.trim().is_empty() {
                self.store.dir = Some(PathBuf::from(v));
            }
        }
        Ok(())
    }

    fn resolve_api_keys(&mut self) -> Result<()> {
        if let Some(key) = &self.collectors.fires.api_key {
            if key.trim().eq_ignore_ascii_case("env") {
                let v = std::env::var(ENV_FIRMS_KEY)
                    .map_err(|_| anyhow!("Missing {ENV_FIRMS_KEY} env var"))?;
                self.collectors.fires.api_key = Some(v);
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !self.bounds.is_valid() {
            bail!("bounds are not a well-formed WGS84 box: {:?}", self.bounds);
        }
        if self.tick_secs == 0 {
            bail!("tick_secs must be > 0");
        }
        if self.max_parallel == 0 {
            bail!("max_parallel must be >= 1");
        }
        if self.history_capacity == 0 {
            bail!("history_capacity must be >= 1");
        }
        if self.subscriber_queue_capacity == 0 {
            bail!("subscriber_queue_capacity must be >= 1");
        }
        self.collectors.fires.validate("fires")?;
        self.collectors.weather.validate("weather")?;
        self.collectors.terrain.validate("terrain")?;
        Ok(())
    }

    pub fn tick(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }

    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_secs(self.snapshot_ttl_secs)
    }

    pub fn record_ttl(&self) -> Duration {
        Duration::from_secs(self.record_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_intervals() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.collectors.fires.refresh_interval_secs, 300);
        assert_eq!(cfg.collectors.weather.refresh_interval_secs, 600);
        assert_eq!(cfg.collectors.terrain.refresh_interval_secs, 3_600);
        assert_eq!(cfg.collectors.fires.timeout_secs, 30);
        assert_eq!(cfg.collectors.fires.max_attempts, 3);
        assert_eq!(cfg.history_capacity, 500);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg = PipelineConfig::from_toml_str(
            r#"
            tick_secs = 2
            [collectors.weather]
            refresh_interval_secs = 120
            timeout_secs = 5
            "#,
        )
        .unwrap();
        assert_eq!(cfg.tick_secs, 2);
        assert_eq!(cfg.collectors.weather.refresh_interval_secs, 120);
        assert_eq!(cfg.collectors.weather.timeout_secs, 5);
        assert_eq!(cfg.collectors.weather.max_attempts, 3);
        assert_eq!(cfg.collectors.fires.refresh_interval_secs, 300);
    }

    #[test]
    fn inverted_bounds_are_rejected() {
        let err = PipelineConfig::from_toml_str(
            r#"
            [bounds]
            min_lat = 40.0
            max_lat = 30.0
            min_lon = -120.0
            max_lon = -110.0
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("bounds"));
    }

    #[test]
    fn zero_attempts_rejected() {
        let err = PipelineConfig::from_toml_str(
            r#"
            [collectors.fires]
            refresh_interval_secs = 300
            max_attempts = 0
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("max_attempts"));
    }
}

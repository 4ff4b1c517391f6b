//! Engine tunables
//!
//! Loaded from `<config_dir>/sqlstream/engine.toml` when present. Every
//! field has a default so a partial file is valid.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{EngineError, Result};

pub const DEFAULT_MAX_CONNECTIONS: usize = 5;
pub const DEFAULT_BATCH_SIZE: usize = 1000;
pub const DEFAULT_POOL_ACQUIRE_TIMEOUT_S: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on pooled connections per target database
    pub max_connections: usize,
    /// Rows requested per fetch
    pub batch_size: usize,
    /// Estimated row count above which a stream waits for confirmation
    pub large_dataset_threshold: Option<u64>,
    /// Seconds `acquire()` may block before failing
    pub pool_acquire_timeout_s: u64,
    /// Pause between background fetches; 0 yields to the scheduler instead
    pub fetch_pause_ms: u64,
    /// Upper bound on the advisory row-count query
    pub estimate_timeout_ms: u64,
    /// How long teardown waits for streams to stop
    pub teardown_wait_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            batch_size: DEFAULT_BATCH_SIZE,
            large_dataset_threshold: None,
            pool_acquire_timeout_s: DEFAULT_POOL_ACQUIRE_TIMEOUT_S,
            fetch_pause_ms: 0,
            estimate_timeout_ms: 5_000,
            teardown_wait_ms: 500,
        }
    }
}

impl EngineConfig {
    /// Location of the engine config file in the platform config directory
    pub fn default_path() -> Result<PathBuf> {
        dirs::config_dir()
            .map(|dir| dir.join("sqlstream").join("engine.toml"))
            .ok_or_else(|| {
                EngineError::Configuration("could not determine config directory".into())
            })
    }

    /// Parse a TOML document
    pub fn from_toml(text: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(text)
            .map_err(|e| EngineError::Configuration(format!("invalid engine config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        tracing::debug!(path = %path.display(), "loading engine config");
        Self::from_toml(&text)
    }

    /// Load from `path`, falling back to defaults when the file does not exist
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "no engine config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_connections == 0 {
            return Err(EngineError::Configuration(
                "max_connections must be greater than 0".into(),
            ));
        }
        if self.batch_size == 0 {
            return Err(EngineError::Configuration(
                "batch_size must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_large_dataset_threshold(mut self, threshold: u64) -> Self {
        self.large_dataset_threshold = Some(threshold);
        self
    }

    pub fn with_fetch_pause_ms(mut self, pause_ms: u64) -> Self {
        self.fetch_pause_ms = pause_ms;
        self
    }

    pub fn pool_acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_acquire_timeout_s)
    }

    pub fn fetch_pause(&self) -> Duration {
        Duration::from_millis(self.fetch_pause_ms)
    }

    pub fn estimate_timeout(&self) -> Duration {
        Duration::from_millis(self.estimate_timeout_ms)
    }

    pub fn teardown_wait(&self) -> Duration {
        Duration::from_millis(self.teardown_wait_ms)
    }
}

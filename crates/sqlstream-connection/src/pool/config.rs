//! Pool configuration types

use std::time::Duration;

use serde::{Deserialize, Serialize};
use sqlstream_core::EngineConfig;

/// Configuration for a connection pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of connections the pool creates
    max_size: usize,
    /// Timeout in milliseconds when acquiring a connection from the pool
    acquire_timeout_ms: u64,
}

impl PoolConfig {
    /// Create a pool configuration with the given maximum size
    ///
    /// # Panics
    ///
    /// Panics if `max_size` is 0.
    pub fn new(max_size: usize) -> Self {
        assert!(
            max_size > 0,
            "max_size must be greater than 0, got {}",
            max_size
        );
        Self {
            max_size,
            acquire_timeout_ms: 30_000,
        }
    }

    /// Pool settings from the engine configuration
    pub fn from_engine(config: &EngineConfig) -> Self {
        Self::new(config.max_connections.max(1))
            .with_acquire_timeout_ms(config.pool_acquire_timeout_s.saturating_mul(1000))
    }

    /// Set the acquire timeout in milliseconds
    pub fn with_acquire_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.acquire_timeout_ms = timeout_ms;
        self
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }
}

impl Default for PoolConfig {
    /// Five connections, 30 second acquire timeout
    fn default() -> Self {
        Self::new(sqlstream_core::DEFAULT_MAX_CONNECTIONS)
    }
}

//! Per-backend adapter contract
//!
//! Everything the engine does differently per backend goes through a
//! `BackendAdapter`: building connections, wrapping a query for an
//! advisory row count, and deciding whether an error means the
//! connection is gone.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{Connection, ConnectionConfig, Dialect, EngineError, Result};

/// How the engine should react to a failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The connection is unusable; offer a reconnect
    ConnectionLoss,
    /// The statement failed but the connection is fine
    Execution,
}

impl ErrorClass {
    pub fn is_connection_loss(&self) -> bool {
        matches!(self, ErrorClass::ConnectionLoss)
    }
}

#[async_trait]
pub trait BackendAdapter: Send + Sync {
    fn dialect(&self) -> Dialect;

    /// Open a new connection to the configured database
    async fn create_connection(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>>;

    /// Driver connection string for the configuration
    fn connection_string(&self, config: &ConnectionConfig) -> Result<String>;

    /// Wrap a single SELECT so it returns its row count, or `None` when the
    /// statement cannot be wrapped safely
    fn build_count_wrapper(&self, sql: &str) -> Option<String>;

    fn classify_error(&self, error: &EngineError) -> ErrorClass;

    /// Cheap statement used to check that a pooled connection is alive
    fn liveness_probe(&self) -> &'static str {
        "SELECT 1"
    }

    /// Whether a second connection to `config` sees the same data, so a
    /// SELECT can stream on its own connection
    fn supports_dedicated_connections(&self, _config: &ConnectionConfig) -> bool {
        true
    }
}

//! Connection construction shared by the pool and the reconnection manager

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlstream_core::{BackendAdapter, Connection, ConnectionConfig, Result};

use crate::probe::probe_connection;

/// Factory trait for creating new connections
#[async_trait]
pub trait ConnectionFactory: Send + Sync + 'static {
    /// Create a new connection
    async fn create(&self) -> Result<Arc<dyn Connection>>;

    /// Validate that a connection is still usable
    ///
    /// Default implementation only checks that it is not closed.
    async fn validate(&self, conn: &dyn Connection) -> bool {
        !conn.is_closed()
    }
}

#[async_trait]
impl<T: ConnectionFactory> ConnectionFactory for Arc<T> {
    async fn create(&self) -> Result<Arc<dyn Connection>> {
        (**self).create().await
    }

    async fn validate(&self, conn: &dyn Connection) -> bool {
        (**self).validate(conn).await
    }
}

/// Opens connections for one database definition through its backend adapter
pub struct AdapterConnectionFactory {
    adapter: Arc<dyn BackendAdapter>,
    config: ConnectionConfig,
    probe_timeout: Duration,
}

impl AdapterConnectionFactory {
    pub fn new(adapter: Arc<dyn BackendAdapter>, config: ConnectionConfig) -> Self {
        Self {
            adapter,
            config,
            probe_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn adapter(&self) -> &Arc<dyn BackendAdapter> {
        &self.adapter
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }
}

#[async_trait]
impl ConnectionFactory for AdapterConnectionFactory {
    async fn create(&self) -> Result<Arc<dyn Connection>> {
        let conn = self.adapter.create_connection(&self.config).await?;
        tracing::debug!(
            connection_id = %conn.id(),
            dialect = %self.adapter.dialect(),
            "created connection"
        );
        Ok(conn)
    }

    /// Runs the adapter's liveness probe
    async fn validate(&self, conn: &dyn Connection) -> bool {
        match probe_connection(conn, self.adapter.liveness_probe(), self.probe_timeout).await {
            Ok(latency) => {
                tracing::trace!(connection_id = %conn.id(), ?latency, "liveness probe passed");
                true
            }
            Err(e) => {
                tracing::debug!(connection_id = %conn.id(), error = %e, "liveness probe failed");
                false
            }
        }
    }
}

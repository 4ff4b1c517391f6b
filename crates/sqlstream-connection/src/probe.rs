//! Connection liveness probe
//!
//! Runs the adapter's minimal probe statement on a connection and measures
//! the round trip. The pool uses it before handing out an idle connection.

use std::time::{Duration, Instant};

use sqlstream_core::{Connection, EngineError};
use thiserror::Error;

/// Result of a probe
pub type ProbeResult = Result<Duration, ProbeError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("Connection is closed")]
    ConnectionClosed,
    #[error("Probe query failed: {0}")]
    QueryFailed(String),
    #[error("Probe timed out after {0:?}")]
    Timeout(Duration),
}

/// Check that `conn` still answers, returning the round-trip time
pub async fn probe_connection(conn: &dyn Connection, probe_sql: &str, timeout: Duration) -> ProbeResult {
    if conn.is_closed() {
        return Err(ProbeError::ConnectionClosed);
    }

    let start = Instant::now();
    let round_trip = async {
        let mut cursor = conn.cursor().await?;
        cursor.execute(probe_sql).await?;
        if cursor.description().is_some() {
            cursor.fetch_all().await?;
        }
        cursor.close().await?;
        Ok::<_, EngineError>(())
    };

    match tokio::time::timeout(timeout, round_trip).await {
        Ok(Ok(())) => Ok(start.elapsed()),
        Ok(Err(e)) => Err(ProbeError::QueryFailed(e.to_string())),
        Err(_) => Err(ProbeError::Timeout(timeout)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::MockConnection;

    #[tokio::test]
    async fn test_probe_healthy_connection() {
        let conn = MockConnection::new();
        let latency = probe_connection(&conn, "SELECT 1", Duration::from_secs(1)).await;
        assert!(latency.is_ok());
        assert_eq!(conn.executed(), vec!["SELECT 1".to_string()]);
    }

    #[tokio::test]
    async fn test_probe_closed_connection() {
        let conn = MockConnection::new();
        conn.close().await.unwrap();
        assert_eq!(
            probe_connection(&conn, "SELECT 1", Duration::from_secs(1)).await,
            Err(ProbeError::ConnectionClosed)
        );
    }

    #[tokio::test]
    async fn test_probe_broken_connection() {
        let conn = MockConnection::new();
        conn.set_healthy(false);
        let result = probe_connection(&conn, "SELECT 1", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(ProbeError::QueryFailed(msg)) if msg.contains("08S01")));
    }
}

//! Advisory row-count estimate

use std::time::Duration;

use sqlstream_connection::ConnectionPool;
use sqlstream_core::{BackendAdapter, EngineError, Result};

/// Run the adapter's COUNT(*) wrapper for `sql` on a pooled side connection.
///
/// Any failure (no wrapper for this statement, pool exhausted, query error,
/// timeout) yields `None`; the estimate never affects the stream itself.
pub async fn estimate_row_count(
    pool: &ConnectionPool,
    adapter: &dyn BackendAdapter,
    sql: &str,
    timeout: Duration,
) -> Option<u64> {
    let wrapped = adapter.build_count_wrapper(sql)?;

    match tokio::time::timeout(timeout, count_rows(pool, &wrapped)).await {
        Ok(Ok(count)) => count,
        Ok(Err(e)) => {
            tracing::debug!(error = %e, "row count estimate failed");
            None
        }
        Err(_) => {
            tracing::debug!(?timeout, "row count estimate timed out");
            None
        }
    }
}

async fn count_rows(pool: &ConnectionPool, count_sql: &str) -> Result<Option<u64>> {
    let conn = pool.acquire().await?;
    let mut cursor = conn.cursor().await?;
    cursor.execute(count_sql).await?;
    let rows = cursor.fetch_many(1).await?;
    if let Err(e) = cursor.close().await {
        tracing::debug!(error = %e, "closing estimate cursor failed");
    }

    let count = rows.first().and_then(|row| row.get(0)).ok_or_else(|| {
        EngineError::InvalidState("count query returned no rows".into())
    })?;
    Ok(count.as_i64().and_then(|n| u64::try_from(n).ok()))
}

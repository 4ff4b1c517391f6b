//! Pool and reconnection against real SQLite connections

use std::sync::Arc;

use sqlstream_connection::{
    AdapterConnectionFactory, ConnectionPool, ConnectionSlot, PoolConfig, ReconnectionManager,
};
use sqlstream_core::{BackendAdapter, Connection, ConnectionConfig, EngineError, Value};
use sqlstream_drivers::SqliteAdapter;

fn sqlite_pool(dir: &tempfile::TempDir, max_size: usize) -> (ConnectionPool, Arc<dyn BackendAdapter>) {
    let path = dir.path().join("pool.db");
    let config = ConnectionConfig::new_sqlite(path.to_str().unwrap());
    let adapter: Arc<dyn BackendAdapter> = Arc::new(SqliteAdapter::new());
    let factory = AdapterConnectionFactory::new(adapter.clone(), config);
    let pool = ConnectionPool::new(
        PoolConfig::new(max_size).with_acquire_timeout_ms(200),
        factory,
    );
    (pool, adapter)
}

async fn count_rows(conn: &dyn Connection) -> i64 {
    let mut cursor = conn.cursor().await.unwrap();
    cursor.execute("SELECT COUNT(*) FROM notes").await.unwrap();
    let rows = cursor.fetch_all().await.unwrap();
    rows[0].values[0].as_i64().unwrap()
}

#[tokio::test]
async fn test_transaction_commits_through_pool() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, _adapter) = sqlite_pool(&dir, 2);

    pool.transaction(|conn| async move {
        conn.execute("CREATE TABLE notes (body TEXT)").await?;
        conn.execute("INSERT INTO notes VALUES ('a'), ('b')").await
    })
    .await
    .unwrap();

    let conn = pool.acquire().await.unwrap();
    assert_eq!(count_rows(&*conn).await, 2);
}

#[tokio::test]
async fn test_failed_transaction_rolls_back() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, _adapter) = sqlite_pool(&dir, 1);
    {
        let conn = pool.acquire().await.unwrap();
        conn.execute("CREATE TABLE notes (body TEXT NOT NULL)").await.unwrap();
    }

    let result = pool
        .transaction(|conn| async move {
            conn.execute("BEGIN").await?;
            conn.execute("INSERT INTO notes VALUES ('kept?')").await?;
            conn.execute("INSERT INTO notes VALUES (NULL)").await
        })
        .await;
    assert!(matches!(result, Err(EngineError::Driver(_))));

    let conn = pool.acquire().await.unwrap();
    assert_eq!(count_rows(&*conn).await, 0);
}

#[tokio::test]
async fn test_pool_replaces_closed_sqlite_connection() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, _adapter) = sqlite_pool(&dir, 1);

    let first_id = {
        let conn = pool.acquire().await.unwrap();
        conn.id()
    };
    // Close the idle connection behind the pool's back
    {
        let conn = pool.acquire().await.unwrap();
        assert_eq!(conn.id(), first_id);
        conn.close().await.unwrap();
    }

    let conn = pool.acquire().await.unwrap();
    assert_ne!(conn.id(), first_id);
    let mut cursor = conn.cursor().await.unwrap();
    cursor.execute("SELECT 1").await.unwrap();
    assert_eq!(cursor.fetch_all().await.unwrap()[0].values[0], Value::Int64(1));
}

#[tokio::test]
async fn test_reconnect_swaps_session_slot() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, adapter) = sqlite_pool(&dir, 2);
    let manager = ReconnectionManager::for_pool(&pool, adapter);

    let lease = pool.acquire().await.unwrap();
    let slot = ConnectionSlot::new(lease.connection());
    manager.register(&slot);

    let old_id = slot.id();
    let report = manager.reconnect(old_id).await.unwrap();
    assert_eq!(report.contexts_updated, 1);
    assert_ne!(slot.id(), old_id);
    assert!(lease.is_closed());
    assert!(!slot.get().is_closed());
}

//! Integration tests for the SQLite driver

use sqlstream_core::{BackendAdapter, Connection, ConnectionConfig, EngineError, Value};
use sqlstream_drivers::{SqliteAdapter, SqliteConnection};
use tempfile::TempDir;

/// Helper to create a test database with sample data
async fn setup_test_database() -> (TempDir, SqliteConnection) {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let db_path = dir.path().join("stream_test.db");
    let conn = SqliteConnection::open(db_path.to_str().unwrap())
        .await
        .expect("Failed to create test database");

    conn.execute("CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT NOT NULL, price REAL)")
        .await
        .unwrap();
    conn.execute(
        "WITH RECURSIVE seq(n) AS (SELECT 1 UNION ALL SELECT n + 1 FROM seq WHERE n < 2500)
         INSERT INTO items (id, name, price) SELECT n, 'item-' || n, n * 0.5 FROM seq",
    )
    .await
    .unwrap();

    (dir, conn)
}

#[tokio::test]
async fn test_fetch_many_in_bounded_batches() {
    let (_dir, conn) = setup_test_database().await;
    let mut cursor = conn.cursor().await.unwrap();
    cursor
        .execute("SELECT id, name, price FROM items ORDER BY id")
        .await
        .unwrap();

    let columns = cursor.description().expect("select has a description");
    assert_eq!(columns.len(), 3);
    assert_eq!(columns[0].name, "id");
    assert_eq!(columns[0].data_type, "INTEGER");
    assert_eq!(columns[1].data_type, "TEXT");
    assert_eq!(cursor.rowcount(), -1);

    let mut sizes = Vec::new();
    loop {
        let batch = cursor.fetch_many(1000).await.unwrap();
        if batch.is_empty() {
            break;
        }
        sizes.push(batch.len());
    }
    assert_eq!(sizes, vec![1000, 1000, 500]);

    // Exhausted cursors keep returning empty batches
    assert!(cursor.fetch_many(1000).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_rows_arrive_in_order_with_values() {
    let (_dir, conn) = setup_test_database().await;
    let mut cursor = conn.cursor().await.unwrap();
    cursor
        .execute("SELECT id, name, price, NULL FROM items WHERE id <= 3 ORDER BY id")
        .await
        .unwrap();
    let rows = cursor.fetch_all().await.unwrap();

    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].values[0], Value::Int64(1));
    assert_eq!(rows[2].values[1], Value::String("item-3".into()));
    assert_eq!(rows[1].values[2], Value::Float64(1.0));
    assert!(rows[0].values[3].is_null());
}

#[tokio::test]
async fn test_dml_reports_rowcount_and_no_description() {
    let (_dir, conn) = setup_test_database().await;
    let mut cursor = conn.cursor().await.unwrap();
    cursor
        .execute("UPDATE items SET price = 0 WHERE id <= 10")
        .await
        .unwrap();
    assert!(cursor.description().is_none());
    assert_eq!(cursor.rowcount(), 10);
    assert!(matches!(
        cursor.fetch_many(10).await,
        Err(EngineError::InvalidState(_))
    ));
}

#[tokio::test]
async fn test_syntax_error_carries_driver_code() {
    let (_dir, conn) = setup_test_database().await;
    let mut cursor = conn.cursor().await.unwrap();
    let err = cursor.execute("SELEC * FROM items").await.unwrap_err();
    assert!(matches!(err, EngineError::Driver(_)));
    assert!(err.to_string().contains("syntax error"));
    assert!(err.code().is_some());

    // The connection stays usable after a failed statement
    cursor.execute("SELECT 1").await.unwrap();
    assert_eq!(cursor.fetch_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_executing_on_another_cursor_discards_open_result() {
    let (_dir, conn) = setup_test_database().await;
    let mut first = conn.cursor().await.unwrap();
    first.execute("SELECT id FROM items").await.unwrap();
    assert_eq!(first.fetch_many(10).await.unwrap().len(), 10);

    let mut second = conn.cursor().await.unwrap();
    second.execute("SELECT COUNT(*) FROM items").await.unwrap();
    assert_eq!(
        second.fetch_all().await.unwrap()[0].values[0],
        Value::Int64(2500)
    );

    let err = first.fetch_many(10).await.unwrap_err();
    assert!(err.to_string().contains("discarded"));
}

#[tokio::test]
async fn test_explicit_transaction_commit_and_rollback() {
    let (_dir, conn) = setup_test_database().await;
    conn.execute("BEGIN").await.unwrap();
    conn.execute("DELETE FROM items WHERE id > 100").await.unwrap();
    conn.rollback().await.unwrap();

    let mut cursor = conn.cursor().await.unwrap();
    cursor.execute("SELECT COUNT(*) FROM items").await.unwrap();
    assert_eq!(cursor.fetch_all().await.unwrap()[0].values[0], Value::Int64(2500));

    conn.execute("BEGIN").await.unwrap();
    conn.execute("DELETE FROM items WHERE id > 100").await.unwrap();
    conn.commit().await.unwrap();
    cursor.execute("SELECT COUNT(*) FROM items").await.unwrap();
    assert_eq!(cursor.fetch_all().await.unwrap()[0].values[0], Value::Int64(100));

    // Commit outside a transaction is a no-op
    conn.commit().await.unwrap();
}

#[tokio::test]
async fn test_closed_connection_rejects_work() {
    let (_dir, conn) = setup_test_database().await;
    let mut cursor = conn.cursor().await.unwrap();
    conn.close().await.unwrap();
    assert!(conn.is_closed());
    assert!(conn.cursor().await.is_err());
    assert!(cursor.execute("SELECT 1").await.is_err());
    // Closing twice is fine
    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_adapter_opens_file_and_memory_databases() {
    let adapter = SqliteAdapter::new();
    let memory = ConnectionConfig::new_sqlite(":memory:");
    assert!(!adapter.supports_dedicated_connections(&memory));
    let conn = adapter.create_connection(&memory).await.unwrap();
    assert_eq!(conn.execute("CREATE TABLE t (x)").await.unwrap(), 0);

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("adapter.db");
    let file = ConnectionConfig::new_sqlite(path.to_str().unwrap());
    assert!(adapter.supports_dedicated_connections(&file));
    let a = adapter.create_connection(&file).await.unwrap();
    let b = adapter.create_connection(&file).await.unwrap();
    assert_ne!(a.id(), b.id());
    a.execute("CREATE TABLE shared (x)").await.unwrap();
    a.execute("INSERT INTO shared VALUES (1)").await.unwrap();

    let mut cursor = b.cursor().await.unwrap();
    cursor.execute("SELECT x FROM shared").await.unwrap();
    assert_eq!(cursor.fetch_all().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_missing_parent_directory_fails_to_open() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("missing").join("db.sqlite");
    let result = SqliteConnection::open(path.to_str().unwrap()).await;
    assert!(matches!(result, Err(EngineError::Connection(_))));
}

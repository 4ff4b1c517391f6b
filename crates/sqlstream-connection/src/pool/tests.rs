//! Tests for connection pool functionality

use std::time::Duration;

use pretty_assertions::assert_eq;
use sqlstream_core::{Connection, EngineConfig, EngineError};

use super::config::PoolConfig;
use super::pool::ConnectionPool;
use super::stats::PoolStats;
use crate::test_helpers::MockFactory;

fn pool_with(max_size: usize, timeout_ms: u64) -> (ConnectionPool, std::sync::Arc<MockFactory>) {
    let factory = MockFactory::new();
    let config = PoolConfig::new(max_size).with_acquire_timeout_ms(timeout_ms);
    (ConnectionPool::new(config, factory.clone()), factory)
}

// =============================================================================
// PoolConfig tests
// =============================================================================

#[test]
fn test_pool_config_defaults() {
    let config = PoolConfig::default();
    assert_eq!(config.max_size(), 5);
    assert_eq!(config.acquire_timeout(), Duration::from_secs(30));
}

#[test]
fn test_pool_config_from_engine() {
    let engine = EngineConfig {
        max_connections: 2,
        pool_acquire_timeout_s: 3,
        ..EngineConfig::default()
    };
    let config = PoolConfig::from_engine(&engine);
    assert_eq!(config.max_size(), 2);
    assert_eq!(config.acquire_timeout(), Duration::from_secs(3));
}

#[test]
#[should_panic(expected = "max_size must be greater than 0")]
fn test_pool_config_invalid_max_size() {
    PoolConfig::new(0);
}

// =============================================================================
// PoolStats tests
// =============================================================================

#[test]
fn test_pool_stats_exhaustion() {
    let stats = PoolStats {
        created: 2,
        idle: 0,
        checked_out: 2,
        waiting: 1,
        max_size: 2,
    };
    assert!(stats.is_exhausted());
    assert!((stats.utilization() - 1.0).abs() < 0.001);

    let stats = PoolStats {
        created: 1,
        idle: 0,
        checked_out: 1,
        waiting: 0,
        max_size: 2,
    };
    assert!(!stats.is_exhausted());
}

// =============================================================================
// ConnectionPool tests
// =============================================================================

#[tokio::test]
async fn test_acquire_creates_then_reuses() {
    let (pool, factory) = pool_with(5, 1000);

    let first_id = {
        let conn = pool.acquire().await.unwrap();
        assert_eq!(pool.stats().checked_out, 1);
        conn.id()
    };
    assert_eq!(pool.stats().idle, 1);

    let conn = pool.acquire().await.unwrap();
    assert_eq!(conn.id(), first_id);
    assert_eq!(factory.create_count(), 1);
    // Reuse runs the liveness probe
    assert_eq!(factory.connection(0).executed(), vec!["SELECT 1".to_string()]);
}

#[tokio::test]
async fn test_third_acquire_blocks_until_release() {
    let (pool, factory) = pool_with(2, 5_000);

    let first = pool.acquire().await.unwrap();
    let second = pool.acquire().await.unwrap();
    assert_ne!(first.id(), second.id());
    assert_eq!(factory.create_count(), 2);

    let waiter_pool = pool.clone();
    let waiter = tokio::spawn(async move { waiter_pool.acquire().await.map(|c| c.id()) });

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!waiter.is_finished());
    assert_eq!(pool.stats().waiting, 1);

    let released = first.id();
    drop(first);

    let acquired = tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("waiter should be woken by the release")
        .unwrap()
        .unwrap();
    assert_eq!(acquired, released);
    assert_eq!(factory.create_count(), 2);
    drop(second);
}

#[tokio::test]
async fn test_acquire_times_out_when_exhausted() {
    let (pool, _factory) = pool_with(1, 50);
    let _held = pool.acquire().await.unwrap();

    let result = pool.acquire().await;
    match result {
        Err(EngineError::PoolExhausted { timeout }) => {
            assert_eq!(timeout, Duration::from_millis(50))
        }
        Err(other) => panic!("expected PoolExhausted, got {other}"),
        Ok(_) => panic!("expected PoolExhausted, got a connection"),
    }
    assert_eq!(pool.stats().waiting, 0);
}

#[tokio::test]
async fn test_dead_idle_connection_is_discarded() {
    let (pool, factory) = pool_with(1, 1000);
    drop(pool.acquire().await.unwrap());

    factory.connection(0).set_healthy(false);
    let conn = pool.acquire().await.unwrap();

    assert_eq!(factory.create_count(), 2);
    assert_eq!(conn.id(), factory.connection(1).id());
    assert_eq!(pool.stats().created, 1);
}

#[tokio::test]
async fn test_released_closed_connection_frees_capacity() {
    let (pool, factory) = pool_with(1, 5_000);
    let held = pool.acquire().await.unwrap();

    let waiter_pool = pool.clone();
    let waiter = tokio::spawn(async move { waiter_pool.acquire().await.map(|c| c.id()) });
    tokio::time::sleep(Duration::from_millis(50)).await;

    held.close().await.unwrap();
    drop(held);

    let acquired = tokio::time::timeout(Duration::from_secs(2), waiter)
        .await
        .expect("waiter should create after capacity was freed")
        .unwrap()
        .unwrap();
    assert_eq!(acquired, factory.connection(1).id());
    assert_eq!(pool.stats().created, 1);
}

#[tokio::test]
async fn test_discarded_lease_is_closed_not_reused() {
    let (pool, factory) = pool_with(1, 5_000);
    let held = pool.acquire().await.unwrap();
    let held_id = held.id();

    held.discard();
    assert_eq!(pool.stats().created, 0);
    assert_eq!(pool.stats().idle, 0);

    let next = tokio::time::timeout(Duration::from_secs(2), pool.acquire())
        .await
        .expect("discarding should free capacity")
        .unwrap();
    assert_ne!(next.id(), held_id);
    assert_eq!(next.id(), factory.connection(1).id());

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(factory.connection(0).is_closed());
}

#[tokio::test]
async fn test_failed_create_releases_reservation() {
    let (pool, factory) = pool_with(1, 50);
    factory.set_failing(true);
    assert!(matches!(
        pool.acquire().await,
        Err(EngineError::Connection(_))
    ));
    assert_eq!(pool.stats().created, 0);

    factory.set_failing(false);
    assert!(pool.acquire().await.is_ok());
}

#[tokio::test]
async fn test_close_all_resets_counter() {
    let (pool, factory) = pool_with(2, 1000);
    let held = pool.acquire().await.unwrap();
    drop(pool.acquire().await.unwrap());
    assert_eq!(pool.stats().created, 2);

    pool.close_all().await;
    assert_eq!(pool.stats().created, 0);
    assert_eq!(pool.stats().idle, 0);
    assert!(factory.connection(1).is_closed());

    // A lease from before close_all is closed on release, not pooled
    drop(held);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(factory.connection(0).is_closed());
    assert_eq!(pool.stats().idle, 0);
    assert_eq!(pool.stats().created, 0);

    let fresh = pool.acquire().await.unwrap();
    assert_eq!(fresh.id(), factory.connection(2).id());
}

#[tokio::test]
async fn test_transaction_commits_on_success() {
    let (pool, factory) = pool_with(1, 1000);
    let affected = pool
        .transaction(|conn| async move { conn.execute("INSERT INTO t VALUES (1)").await })
        .await
        .unwrap();
    assert_eq!(affected, 1);

    let conn = factory.connection(0);
    assert_eq!(conn.commits(), 1);
    assert_eq!(conn.rollbacks(), 0);
    assert_eq!(pool.stats().idle, 1);
}

#[tokio::test]
async fn test_transaction_rolls_back_on_error() {
    let (pool, factory) = pool_with(1, 1000);
    let result: sqlstream_core::Result<()> = pool
        .transaction(|conn| async move {
            conn.execute("DELETE FROM t").await?;
            Err(EngineError::driver("constraint failed"))
        })
        .await;
    assert!(result.is_err());

    let conn = factory.connection(0);
    assert_eq!(conn.commits(), 0);
    assert_eq!(conn.rollbacks(), 1);
    // Released even though the body failed
    assert_eq!(pool.stats().idle, 1);
}

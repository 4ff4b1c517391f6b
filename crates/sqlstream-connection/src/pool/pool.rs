//! Connection pool implementation

use std::collections::VecDeque;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use sqlstream_core::{Connection, ConnectionId, EngineError, Result};
use tokio::sync::Semaphore;
use tokio::time::Instant;

use super::config::PoolConfig;
use super::stats::PoolStats;
use crate::factory::ConnectionFactory;

struct PoolInner {
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory>,
    /// Idle connections, oldest first
    idle: Mutex<VecDeque<Arc<dyn Connection>>>,
    /// One permit per idle connection, plus one per slot of freed capacity
    /// so blocked callers wake up and create
    available: Semaphore,
    /// Connections created and not yet discarded
    created: Mutex<usize>,
    /// Bumped by `close_all`; leases from an older generation are not returned
    generation: AtomicU64,
    waiting: AtomicUsize,
}

/// A bounded pool of connections to one database
///
/// Cloning is cheap; clones share the same pool.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Create a new connection pool with the given configuration and factory
    pub fn new<F: ConnectionFactory>(config: PoolConfig, factory: F) -> Self {
        Self::with_shared_factory(config, Arc::new(factory))
    }

    pub fn with_shared_factory(config: PoolConfig, factory: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config,
                factory,
                idle: Mutex::new(VecDeque::new()),
                available: Semaphore::new(0),
                created: Mutex::new(0),
                generation: AtomicU64::new(0),
                waiting: AtomicUsize::new(0),
            }),
        }
    }

    /// The factory this pool opens connections with
    pub fn factory(&self) -> Arc<dyn ConnectionFactory> {
        self.inner.factory.clone()
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Check out a connection
    ///
    /// 1. Pop an idle connection without blocking; one that fails the
    ///    liveness probe is discarded
    /// 2. Otherwise create a new connection while under `max_size`
    /// 3. Otherwise wait for a release, failing with
    ///    `EngineError::PoolExhausted` after the acquire timeout
    #[tracing::instrument(level = "debug", skip(self))]
    pub async fn acquire(&self) -> Result<PooledConnection> {
        if let Some(conn) = self.try_pop_idle() {
            if self.inner.factory.validate(&*conn).await {
                tracing::debug!(connection_id = %conn.id(), "reusing pooled connection");
                return Ok(self.lease(conn));
            }
            tracing::debug!(
                connection_id = %conn.id(),
                "discarding pooled connection that failed liveness probe"
            );
            self.forget_created();
            close_in_background(conn);
        }

        if let Some(lease) = self.try_create().await? {
            return Ok(lease);
        }

        self.wait_for_release().await
    }

    fn try_pop_idle(&self) -> Option<Arc<dyn Connection>> {
        let permit = self.inner.available.try_acquire().ok()?;
        permit.forget();
        self.inner.idle.lock().pop_front()
    }

    /// Create a connection if the creation counter allows it
    async fn try_create(&self) -> Result<Option<PooledConnection>> {
        {
            let mut created = self.inner.created.lock();
            if *created >= self.inner.config.max_size() {
                return Ok(None);
            }
            *created += 1;
        }

        match self.inner.factory.create().await {
            Ok(conn) => {
                tracing::debug!(connection_id = %conn.id(), "created pooled connection");
                Ok(Some(self.lease(conn)))
            }
            Err(e) => {
                self.forget_created();
                Err(e)
            }
        }
    }

    async fn wait_for_release(&self) -> Result<PooledConnection> {
        let timeout = self.inner.config.acquire_timeout();
        self.inner.waiting.fetch_add(1, Ordering::SeqCst);
        let result = self.wait_until(Instant::now() + timeout).await;
        self.inner.waiting.fetch_sub(1, Ordering::SeqCst);

        if let Err(EngineError::PoolExhausted { .. }) = &result {
            tracing::warn!(?timeout, "timed out waiting for a pooled connection");
        }
        result
    }

    async fn wait_until(&self, deadline: Instant) -> Result<PooledConnection> {
        let timeout = self.inner.config.acquire_timeout();
        loop {
            let permit = tokio::time::timeout_at(deadline, self.inner.available.acquire())
                .await
                .map_err(|_| EngineError::PoolExhausted { timeout })?
                .map_err(|_| EngineError::Connection("pool semaphore closed".into()))?;
            permit.forget();

            let idle = self.inner.idle.lock().pop_front();
            if let Some(conn) = idle {
                return Ok(self.lease(conn));
            }
            // Freed capacity rather than a connection
            if let Some(lease) = self.try_create().await? {
                return Ok(lease);
            }
        }
    }

    fn lease(&self, connection: Arc<dyn Connection>) -> PooledConnection {
        PooledConnection {
            connection,
            pool: self.clone(),
            generation: self.inner.generation.load(Ordering::SeqCst),
            discarded: false,
        }
    }

    fn forget_created(&self) {
        let mut created = self.inner.created.lock();
        *created = created.saturating_sub(1);
    }

    /// Return a connection to the pool
    fn release(&self, connection: Arc<dyn Connection>, generation: u64) {
        if generation != self.inner.generation.load(Ordering::SeqCst) {
            tracing::debug!(connection_id = %connection.id(), "closing connection leased before close_all");
            close_in_background(connection);
            return;
        }

        if connection.is_closed() {
            self.forget_created();
            self.inner.available.add_permits(1);
            return;
        }

        let mut idle = self.inner.idle.lock();
        if idle.len() >= self.inner.config.max_size() {
            drop(idle);
            tracing::debug!(connection_id = %connection.id(), "pool full, closing released connection");
            self.forget_created();
            close_in_background(connection);
        } else {
            idle.push_back(connection);
        }
        self.inner.available.add_permits(1);
    }

    /// Give up a connection that must not be reused, freeing its capacity
    fn discard(&self, connection: Arc<dyn Connection>, generation: u64) {
        tracing::debug!(connection_id = %connection.id(), "discarding leased connection");
        if generation == self.inner.generation.load(Ordering::SeqCst) {
            self.forget_created();
            self.inner.available.add_permits(1);
        }
        close_in_background(connection);
    }

    /// Run `f` on a pooled connection, committing on success and rolling
    /// back on failure; the connection is released either way
    pub async fn transaction<T, F, Fut>(&self, f: F) -> Result<T>
    where
        F: FnOnce(Arc<dyn Connection>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let lease = self.acquire().await?;
        let conn = lease.connection();
        match f(conn.clone()).await {
            Ok(value) => {
                conn.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback_err) = conn.rollback().await {
                    tracing::warn!(error = %rollback_err, "rollback after failed transaction failed");
                }
                Err(e)
            }
        }
    }

    /// Close every pooled connection and reset the creation counter
    ///
    /// Connections still checked out are closed when they are released.
    pub async fn close_all(&self) {
        self.inner.generation.fetch_add(1, Ordering::SeqCst);
        let drained: Vec<_> = self.inner.idle.lock().drain(..).collect();
        *self.inner.created.lock() = 0;

        // Blocked callers may now create
        let waiting = self.inner.waiting.load(Ordering::SeqCst);
        if waiting > 0 {
            self.inner.available.add_permits(waiting);
        }

        tracing::info!(closed = drained.len(), "closing pooled connections");
        for conn in drained {
            if let Err(e) = conn.close().await {
                tracing::debug!(connection_id = %conn.id(), error = %e, "error closing pooled connection");
            }
        }
    }

    /// Get current pool statistics
    pub fn stats(&self) -> PoolStats {
        let idle = self.inner.idle.lock().len();
        let created = *self.inner.created.lock();
        PoolStats {
            created,
            idle,
            checked_out: created.saturating_sub(idle),
            waiting: self.inner.waiting.load(Ordering::SeqCst),
            max_size: self.inner.config.max_size(),
        }
    }
}

fn close_in_background(connection: Arc<dyn Connection>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if let Err(e) = connection.close().await {
                    tracing::debug!(connection_id = %connection.id(), error = %e, "error closing connection");
                }
            });
        }
        // Without a runtime the connection closes when its last handle drops
        Err(_) => drop(connection),
    }
}

/// A connection checked out of the pool
///
/// Dropping it returns the connection to the pool.
pub struct PooledConnection {
    connection: Arc<dyn Connection>,
    pool: ConnectionPool,
    generation: u64,
    discarded: bool,
}

impl PooledConnection {
    /// Shared handle to the underlying connection
    pub fn connection(&self) -> Arc<dyn Connection> {
        self.connection.clone()
    }

    pub fn id(&self) -> ConnectionId {
        self.connection.id()
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Close the connection instead of returning it, for a connection that
    /// something outside the lease may still be using
    pub fn discard(mut self) {
        self.discarded = true;
    }
}

impl Deref for PooledConnection {
    type Target = dyn Connection;

    fn deref(&self) -> &Self::Target {
        self.connection.as_ref()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if self.discarded {
            self.pool.discard(self.connection.clone(), self.generation);
            return;
        }
        self.pool.release(self.connection.clone(), self.generation);
    }
}

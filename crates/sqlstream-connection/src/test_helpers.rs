//! Mock connections and factories shared by the pool and reconnect tests

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlstream_core::{
    ColumnMeta, Connection, ConnectionId, Cursor, Dialect, EngineError, Result, Row, Value,
};

use crate::factory::ConnectionFactory;
use crate::probe::probe_connection;

#[derive(Default)]
struct MockState {
    closed: AtomicBool,
    broken: AtomicBool,
    executed: Mutex<Vec<String>>,
    commits: AtomicUsize,
    rollbacks: AtomicUsize,
}

/// Connection that answers every SELECT with a single row
pub struct MockConnection {
    id: ConnectionId,
    state: Arc<MockState>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self {
            id: ConnectionId::new(),
            state: Arc::new(MockState::default()),
        }
    }

    /// An unhealthy connection fails every statement with a link failure
    pub fn set_healthy(&self, healthy: bool) {
        self.state.broken.store(!healthy, Ordering::SeqCst);
    }

    pub fn executed(&self) -> Vec<String> {
        self.state.executed.lock().clone()
    }

    pub fn commits(&self) -> usize {
        self.state.commits.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> usize {
        self.state.rollbacks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connection for MockConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn cursor(&self) -> Result<Box<dyn Cursor>> {
        Ok(Box::new(MockCursor {
            state: self.state.clone(),
            description: None,
            pending: Vec::new(),
            rowcount: -1,
        }))
    }

    async fn commit(&self) -> Result<()> {
        self.state.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
        self.state.rollbacks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.state.closed.load(Ordering::SeqCst)
    }
}

struct MockCursor {
    state: Arc<MockState>,
    description: Option<Vec<ColumnMeta>>,
    pending: Vec<Row>,
    rowcount: i64,
}

#[async_trait]
impl Cursor for MockCursor {
    async fn execute(&mut self, sql: &str) -> Result<()> {
        if self.state.closed.load(Ordering::SeqCst) {
            return Err(EngineError::Connection("connection is closed".into()));
        }
        if self.state.broken.load(Ordering::SeqCst) {
            return Err(EngineError::driver_with_code(
                "08S01",
                "Communication link failure",
            ));
        }
        self.state.executed.lock().push(sql.to_string());
        if sql.trim_start().to_ascii_uppercase().starts_with("SELECT") {
            self.description = Some(vec![ColumnMeta::new("value", "INTEGER", 0)]);
            self.pending = vec![Row::new(vec![Value::Int64(1)])];
            self.rowcount = -1;
        } else {
            self.description = None;
            self.pending.clear();
            self.rowcount = 1;
        }
        Ok(())
    }

    async fn fetch_many(&mut self, size: usize) -> Result<Vec<Row>> {
        let take = size.min(self.pending.len());
        Ok(self.pending.drain(..take).collect())
    }

    fn description(&self) -> Option<&[ColumnMeta]> {
        self.description.as_deref()
    }

    fn rowcount(&self) -> i64 {
        self.rowcount
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Factory that hands out `MockConnection`s and remembers them
#[derive(Default)]
pub struct MockFactory {
    created: Mutex<Vec<Arc<MockConnection>>>,
    fail: AtomicBool,
}

impl MockFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn create_count(&self) -> usize {
        self.created.lock().len()
    }

    pub fn connection(&self, index: usize) -> Arc<MockConnection> {
        self.created.lock()[index].clone()
    }
}

#[async_trait]
impl ConnectionFactory for MockFactory {
    async fn create(&self) -> Result<Arc<dyn Connection>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(EngineError::Connection("connection refused".into()));
        }
        let conn = Arc::new(MockConnection::new());
        self.created.lock().push(conn.clone());
        Ok(conn)
    }

    async fn validate(&self, conn: &dyn Connection) -> bool {
        probe_connection(conn, "SELECT 1", Duration::from_secs(1))
            .await
            .is_ok()
    }
}

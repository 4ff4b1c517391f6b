//! Scripted cursors and backends for streamer and coordinator tests

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use sqlstream_core::{
    BackendAdapter, ColumnMeta, Connection, ConnectionConfig, ConnectionId, Cursor, Dialect,
    EngineError, ErrorClass, Result, Row, Value,
};
use sqlstream_drivers::count::build_count_wrapper;
use sqlstream_drivers::markers::{BackendMarkers, classify};
use tokio::sync::{Semaphore, mpsc};

use crate::events::ExecutionEvent;

// =============================================================================
// Counting cursor
// =============================================================================

/// Cursor over `total` integer rows that counts its fetches and can make
/// each fetch wait for a permit
pub struct CountingCursor {
    total: usize,
    next: usize,
    fetch_calls: Arc<AtomicUsize>,
    gate: Option<Arc<Semaphore>>,
    fail_on_call: Option<usize>,
    description: Vec<ColumnMeta>,
}

impl CountingCursor {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            next: 0,
            fetch_calls: Arc::new(AtomicUsize::new(0)),
            gate: None,
            fail_on_call: None,
            description: vec![ColumnMeta::new("n", "INTEGER", 0)],
        }
    }

    /// Every fetch consumes one permit before returning
    pub fn with_gate(mut self, gate: Arc<Semaphore>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// The given 1-based fetch call fails
    pub fn failing_on_call(mut self, call: usize) -> Self {
        self.fail_on_call = Some(call);
        self
    }

    pub fn fetch_calls(&self) -> Arc<AtomicUsize> {
        self.fetch_calls.clone()
    }
}

#[async_trait]
impl Cursor for CountingCursor {
    async fn execute(&mut self, _sql: &str) -> Result<()> {
        self.next = 0;
        Ok(())
    }

    async fn fetch_many(&mut self, size: usize) -> Result<Vec<Row>> {
        let call = self.fetch_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(gate) = &self.gate {
            gate.acquire()
                .await
                .map_err(|_| EngineError::Cancelled)?
                .forget();
        }
        if self.fail_on_call == Some(call) {
            return Err(EngineError::driver("fetch failed on purpose"));
        }
        let end = (self.next + size).min(self.total);
        let rows = (self.next..end)
            .map(|n| Row::new(vec![Value::Int64(n as i64)]))
            .collect();
        self.next = end;
        Ok(rows)
    }

    fn description(&self) -> Option<&[ColumnMeta]> {
        Some(&self.description)
    }

    fn rowcount(&self) -> i64 {
        -1
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// Scripted backend
// =============================================================================

#[derive(Default)]
struct ConnectionState {
    closed: AtomicBool,
    broken: AtomicBool,
    executed: Mutex<Vec<String>>,
    commits: AtomicUsize,
}

/// Connection with a tiny script language:
///
/// - `SELECT <n>` returns rows `0..n`
/// - its COUNT(*) wrapper returns `n`
/// - any other SELECT returns one row
/// - `EXEC TWO` returns rows `0..3`, then a second result set `100..102`
/// - `SELECT LOST` fails as if the link dropped
/// - statements starting with `FAIL` are rejected
/// - everything else affects one row
pub struct ScriptedConnection {
    id: ConnectionId,
    state: Arc<ConnectionState>,
}

impl ScriptedConnection {
    fn new() -> Self {
        Self {
            id: ConnectionId::new(),
            state: Arc::new(ConnectionState::default()),
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
}

#[async_trait]
impl Connection for ScriptedConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn dialect(&self) -> Dialect {
        Dialect::PostgreSql
    }

    async fn cursor(&self) -> Result<Box<dyn Cursor>> {
        if self.is_closed() {
            return Err(EngineError::Connection("connection is closed".into()));
        }
        Ok(Box::new(ScriptedCursor {
            state: self.state.clone(),
            description: None,
            pending: Vec::new(),
            queued: Vec::new(),
            rowcount: -1,
        }))
    }

    async fn commit(&self) -> Result<()> {
        self.state.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn rollback(&self) -> Result<()> {
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

struct ScriptedCursor {
    state: Arc<ConnectionState>,
    description: Option<Vec<ColumnMeta>>,
    pending: Vec<Row>,
    /// Result sets after the current one
    queued: Vec<Vec<Row>>,
    rowcount: i64,
}

fn int_rows(values: impl Iterator<Item = i64>) -> Vec<Row> {
    values.map(|n| Row::new(vec![Value::Int64(n)])).collect()
}

fn link_failure() -> EngineError {
    EngineError::driver_with_code("08S01", "Communication link failure")
}

#[async_trait]
impl Cursor for ScriptedCursor {
    async fn execute(&mut self, sql: &str) -> Result<()> {
        if self.state.broken.load(Ordering::SeqCst) {
            return Err(link_failure());
        }
        self.state.executed.lock().push(sql.to_string());
        self.queued.clear();

        let upper = sql.trim().to_ascii_uppercase();
        if upper == "SELECT LOST" {
            return Err(link_failure());
        }
        if upper.starts_with("FAIL") {
            return Err(EngineError::driver_with_code("42601", "syntax error at or near \"FAIL\""));
        }
        if let Some(inner) = upper.strip_prefix("SELECT COUNT(*) FROM (") {
            // Row-count estimate of a `SELECT <n>`
            let count = inner
                .strip_prefix("SELECT")
                .and_then(|rest| rest.split(')').next())
                .and_then(|n| n.trim().parse::<i64>().ok())
                .unwrap_or(1);
            self.description = Some(vec![ColumnMeta::new("count", "BIGINT", 0)]);
            self.pending = vec![Row::new(vec![Value::Int64(count)])];
            self.rowcount = -1;
        } else if upper == "EXEC TWO" {
            self.description = Some(vec![ColumnMeta::new("n", "INTEGER", 0)]);
            self.pending = int_rows(0..3);
            self.queued = vec![int_rows(100..102)];
            self.rowcount = -1;
        } else if let Some(rest) = upper.strip_prefix("SELECT") {
            let count = rest.trim().parse::<i64>().unwrap_or(1);
            self.description = Some(vec![ColumnMeta::new("n", "INTEGER", 0)]);
            self.pending = int_rows(0..count);
            self.rowcount = -1;
        } else {
            self.description = None;
            self.pending.clear();
            self.rowcount = 1;
        }
        Ok(())
    }

    async fn fetch_many(&mut self, size: usize) -> Result<Vec<Row>> {
        if self.state.broken.load(Ordering::SeqCst) {
            return Err(link_failure());
        }
        let take = size.min(self.pending.len());
        Ok(self.pending.drain(..take).collect())
    }

    fn description(&self) -> Option<&[ColumnMeta]> {
        self.description.as_deref()
    }

    fn rowcount(&self) -> i64 {
        self.rowcount
    }

    async fn next_set(&mut self) -> Result<bool> {
        if self.queued.is_empty() {
            self.description = None;
            self.pending.clear();
            return Ok(false);
        }
        self.pending = self.queued.remove(0);
        self.description = Some(vec![ColumnMeta::new("n", "INTEGER", 0)]);
        self.rowcount = -1;
        Ok(true)
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Adapter over `ScriptedConnection`s that remembers every connection it
/// opened, in order
#[derive(Default)]
pub struct ScriptedAdapter {
    opened: Mutex<Vec<Arc<ScriptedConnection>>>,
    refuse: AtomicBool,
}

impl ScriptedAdapter {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connection(&self, index: usize) -> Arc<ScriptedConnection> {
        self.opened.lock()[index].clone()
    }

    pub fn opened(&self) -> usize {
        self.opened.lock().len()
    }

    /// While refusing, new connections fail as if the server were down
    pub fn set_refusing(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn config() -> ConnectionConfig {
        ConnectionConfig::new_server(Dialect::PostgreSql, "db.example", 5432, "app", "tester")
    }
}

#[async_trait]
impl BackendAdapter for ScriptedAdapter {
    fn dialect(&self) -> Dialect {
        Dialect::PostgreSql
    }

    async fn create_connection(&self, _config: &ConnectionConfig) -> Result<Arc<dyn Connection>> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(EngineError::ConnectionLost("connection refused".into()));
        }
        let conn = Arc::new(ScriptedConnection::new());
        self.opened.lock().push(conn.clone());
        Ok(conn)
    }

    fn connection_string(&self, _config: &ConnectionConfig) -> Result<String> {
        Ok("scripted".into())
    }

    fn build_count_wrapper(&self, sql: &str) -> Option<String> {
        build_count_wrapper(sql, Dialect::PostgreSql)
    }

    fn classify_error(&self, error: &EngineError) -> ErrorClass {
        classify(error, &BackendMarkers::NONE)
    }
}

// =============================================================================
// Events
// =============================================================================

/// Everything currently queued on the receiver
pub fn drain_events(rx: &mut mpsc::UnboundedReceiver<ExecutionEvent>) -> Vec<ExecutionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Row values of every `RowBatch` event, in arrival order
pub fn delivered_values(events: &[ExecutionEvent]) -> Vec<i64> {
    events
        .iter()
        .filter_map(|event| match event {
            ExecutionEvent::RowBatch { rows, .. } => Some(rows),
            _ => None,
        })
        .flatten()
        .filter_map(|row| row.get(0).and_then(Value::as_i64))
        .collect()
}

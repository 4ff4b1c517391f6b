//! Row streamer state machine

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sqlstream_core::{
    ColumnMeta, Connection, ConnectionId, Cursor, EngineConfig, EngineError, Result, Row,
};
use tokio::task::JoinHandle;

use crate::events::{EventSink, ExecutionEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StreamId(pub u64);

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "result set #{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamState {
    /// Opened, nothing fetched in the background yet
    Idle,
    Loading,
    /// The cursor is exhausted
    Complete,
    /// Stopped by request; more rows may remain
    Stopped,
    Errored,
}

impl StreamState {
    pub fn is_finished(&self) -> bool {
        matches!(self, StreamState::Complete | StreamState::Errored)
    }

    pub fn has_more(&self) -> bool {
        !self.is_finished()
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StreamState::Idle => "idle",
            StreamState::Loading => "loading",
            StreamState::Complete => "complete",
            StreamState::Stopped => "stopped",
            StreamState::Errored => "errored",
        };
        f.write_str(name)
    }
}

/// Where a stream's cursor lives
pub enum StreamConnection {
    /// The coordinator's session connection, which outlives the stream
    Session,
    /// Opened for this stream alone and closed with it
    Dedicated(Arc<dyn Connection>),
}

impl StreamConnection {
    pub fn is_dedicated(&self) -> bool {
        matches!(self, StreamConnection::Dedicated(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchSettings {
    pub batch_size: usize,
    /// Pause between background batches; zero yields instead
    pub pause: Duration,
}

impl FetchSettings {
    pub fn new(batch_size: usize) -> Self {
        Self {
            batch_size: batch_size.max(1),
            pause: Duration::ZERO,
        }
    }

    pub fn from_engine(config: &EngineConfig) -> Self {
        Self::new(config.batch_size).with_pause(config.fetch_pause())
    }

    pub fn with_pause(mut self, pause: Duration) -> Self {
        self.pause = pause;
        self
    }
}

/// Point-in-time view of a stream
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamSnapshot {
    pub id: StreamId,
    pub statement_index: usize,
    pub columns: Vec<ColumnMeta>,
    pub state: StreamState,
    pub rows_fetched: u64,
    /// Advisory; filled in by the row-count estimate when it succeeds
    pub total_expected: Option<u64>,
    pub has_more: bool,
    pub stop_requested: bool,
    pub error: Option<String>,
    pub connection_id: ConnectionId,
    pub dedicated: bool,
}

/// State shared between a streamer, its fetch task and its handles
struct StreamShared {
    id: StreamId,
    state: Mutex<StreamState>,
    stop_requested: AtomicBool,
    rows_fetched: AtomicU64,
    total_expected: Mutex<Option<u64>>,
    error: Mutex<Option<String>>,
    events: EventSink,
}

impl StreamShared {
    fn state(&self) -> StreamState {
        *self.state.lock()
    }

    fn set_state(&self, state: StreamState) {
        *self.state.lock() = state;
    }

    fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        let mut state = self.state.lock();
        if *state == StreamState::Idle {
            *state = StreamState::Stopped;
        }
    }

    fn deliver(&self, rows: Vec<Row>) {
        let offset = self
            .rows_fetched
            .fetch_add(rows.len() as u64, Ordering::SeqCst);
        self.events.emit(ExecutionEvent::RowBatch {
            stream_id: self.id,
            offset,
            rows,
        });
    }

    fn finish(&self, state: StreamState, error: Option<String>) {
        self.set_state(state);
        *self.error.lock() = error.clone();
        let rows_fetched = self.rows_fetched.load(Ordering::SeqCst);
        tracing::debug!(stream = self.id.0, %state, rows_fetched, "stream finished");
        self.events.emit(ExecutionEvent::StreamFinished {
            stream_id: self.id,
            state,
            rows_fetched,
            error,
        });
    }
}

/// Cloneable control over a stream from other tasks
#[derive(Clone)]
pub struct StreamHandle {
    shared: Arc<StreamShared>,
}

impl StreamHandle {
    pub fn id(&self) -> StreamId {
        self.shared.id
    }

    pub fn state(&self) -> StreamState {
        self.shared.state()
    }

    pub fn rows_fetched(&self) -> u64 {
        self.shared.rows_fetched.load(Ordering::SeqCst)
    }

    pub fn total_expected(&self) -> Option<u64> {
        *self.shared.total_expected.lock()
    }

    pub fn set_total_expected(&self, total: u64) {
        *self.shared.total_expected.lock() = Some(total);
    }

    /// Ask the stream to stop. Idempotent; a batch already being fetched
    /// is still delivered, nothing requested after this call is.
    pub fn stop(&self) {
        self.shared.request_stop();
    }
}

impl fmt::Debug for StreamHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamHandle")
            .field("id", &self.shared.id)
            .field("state", &self.shared.state())
            .finish()
    }
}

type FetchOutcome = (Box<dyn Cursor>, Option<EngineError>);

/// Streams the rows of one open cursor
pub struct RowStreamer {
    shared: Arc<StreamShared>,
    statement_index: usize,
    columns: Vec<ColumnMeta>,
    settings: FetchSettings,
    cursor: Option<Box<dyn Cursor>>,
    worker: Option<JoinHandle<FetchOutcome>>,
    connection: StreamConnection,
    connection_id: ConnectionId,
    last_error: Option<EngineError>,
}

impl RowStreamer {
    /// Wrap a cursor that has executed a row-returning statement
    pub fn new(
        id: StreamId,
        statement_index: usize,
        cursor: Box<dyn Cursor>,
        connection: StreamConnection,
        connection_id: ConnectionId,
        settings: FetchSettings,
        events: EventSink,
    ) -> Result<Self> {
        let columns = cursor
            .description()
            .map(<[ColumnMeta]>::to_vec)
            .ok_or_else(|| EngineError::InvalidState("statement produced no result set".into()))?;

        Ok(Self {
            shared: Arc::new(StreamShared {
                id,
                state: Mutex::new(StreamState::Idle),
                stop_requested: AtomicBool::new(false),
                rows_fetched: AtomicU64::new(0),
                total_expected: Mutex::new(None),
                error: Mutex::new(None),
                events,
            }),
            statement_index,
            columns,
            settings,
            cursor: Some(cursor),
            worker: None,
            connection,
            connection_id,
            last_error: None,
        })
    }

    pub fn id(&self) -> StreamId {
        self.shared.id
    }

    pub fn statement_index(&self) -> usize {
        self.statement_index
    }

    pub fn columns(&self) -> &[ColumnMeta] {
        &self.columns
    }

    pub fn state(&self) -> StreamState {
        self.shared.state()
    }

    pub fn rows_fetched(&self) -> u64 {
        self.shared.rows_fetched.load(Ordering::SeqCst)
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    pub fn is_dedicated(&self) -> bool {
        self.connection.is_dedicated()
    }

    pub fn handle(&self) -> StreamHandle {
        StreamHandle {
            shared: self.shared.clone(),
        }
    }

    /// Whether a background task still holds the cursor
    pub fn is_loading(&self) -> bool {
        self.worker.as_ref().is_some_and(|worker| !worker.is_finished())
    }

    /// The error that ended the stream, if it ended in `Errored`
    pub fn take_error(&mut self) -> Option<EngineError> {
        self.last_error.take()
    }

    /// Begin fetching in the background
    pub fn start(&mut self) -> Result<()> {
        match self.state() {
            StreamState::Idle => self.spawn_worker(),
            state => Err(EngineError::InvalidState(format!(
                "cannot start a stream that is {}",
                state
            ))),
        }
    }

    pub fn stop(&self) {
        self.shared.request_stop();
    }

    /// Continue background fetching after `stop` or a deferred start
    pub async fn resume(&mut self) -> Result<()> {
        if self.worker.is_some() {
            if !self.shared.stop_requested() {
                return Ok(());
            }
            self.wait().await;
        }
        match self.state() {
            StreamState::Idle | StreamState::Stopped => {
                self.shared.stop_requested.store(false, Ordering::SeqCst);
                self.spawn_worker()
            }
            state => Err(EngineError::InvalidState(format!(
                "cannot resume a stream that is {}",
                state
            ))),
        }
    }

    /// Wait for background fetching to end and take the cursor back
    pub async fn wait(&mut self) -> StreamState {
        if let Some(worker) = self.worker.take() {
            match worker.await {
                Ok((cursor, error)) => {
                    self.cursor = Some(cursor);
                    self.last_error = error;
                }
                Err(e) => {
                    tracing::error!(stream = self.shared.id.0, error = %e, "fetch task failed");
                    self.shared
                        .finish(StreamState::Errored, Some(format!("fetch task failed: {}", e)));
                }
            }
        }
        self.state()
    }

    /// Fetch exactly one more batch in the caller's task. Returns the number
    /// of rows delivered; zero means the stream is complete.
    pub async fn load_more(&mut self) -> Result<usize> {
        if self.worker.is_some() {
            if !self.shared.stop_requested() {
                return Err(EngineError::InvalidState(
                    "stream is already loading in the background".into(),
                ));
            }
            self.wait().await;
        }
        match self.state() {
            StreamState::Complete => return Ok(0),
            StreamState::Errored => {
                return Err(EngineError::InvalidState(format!(
                    "stream failed: {}",
                    self.shared.error.lock().clone().unwrap_or_default()
                )));
            }
            _ => {}
        }

        let cursor = self
            .cursor
            .as_mut()
            .ok_or_else(|| EngineError::InvalidState("cursor is no longer available".into()))?;
        self.shared.set_state(StreamState::Loading);
        match cursor.fetch_many(self.settings.batch_size).await {
            Ok(rows) if rows.is_empty() => {
                self.shared.finish(StreamState::Complete, None);
                Ok(0)
            }
            Ok(rows) => {
                let count = rows.len();
                self.shared.deliver(rows);
                self.shared.set_state(StreamState::Stopped);
                Ok(count)
            }
            Err(e) => {
                self.shared.finish(StreamState::Errored, Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// Fetch everything in the caller's task. Stops early when a stop is
    /// requested; returns the total number of rows delivered.
    pub async fn drain(&mut self) -> Result<u64> {
        if self.worker.is_some() {
            self.wait().await;
        }
        if !self.state().is_finished() {
            let cursor = self
                .cursor
                .take()
                .ok_or_else(|| EngineError::InvalidState("cursor is no longer available".into()))?;
            self.shared.set_state(StreamState::Loading);
            let (cursor, error) =
                fetch_until_done(cursor, self.shared.clone(), self.settings).await;
            self.cursor = Some(cursor);
            self.last_error = error;
        }
        match self.last_error.take() {
            Some(e) => Err(e),
            None => Ok(self.rows_fetched()),
        }
    }

    /// Hand the cursor back to the caller, e.g. to move on to the next
    /// result set. `None` while a background fetch owns it.
    pub fn detach_cursor(&mut self) -> Option<Box<dyn Cursor>> {
        if self.worker.is_some() {
            return None;
        }
        self.cursor.take()
    }

    pub fn snapshot(&self) -> StreamSnapshot {
        let state = self.state();
        StreamSnapshot {
            id: self.shared.id,
            statement_index: self.statement_index,
            columns: self.columns.clone(),
            state,
            rows_fetched: self.rows_fetched(),
            total_expected: *self.shared.total_expected.lock(),
            has_more: state.has_more(),
            stop_requested: self.shared.stop_requested(),
            error: self.shared.error.lock().clone(),
            connection_id: self.connection_id,
            dedicated: self.connection.is_dedicated(),
        }
    }

    /// Stop, wait up to `wait` for the fetch task, then release the cursor.
    /// A dedicated connection is closed in the background.
    pub async fn close(mut self, wait: Duration) {
        self.shared.request_stop();
        if let Some(worker) = self.worker.take() {
            let abort = worker.abort_handle();
            match tokio::time::timeout(wait, worker).await {
                Ok(Ok((cursor, _))) => self.cursor = Some(cursor),
                Ok(Err(e)) => tracing::debug!(error = %e, "fetch task ended abnormally"),
                Err(_) => {
                    tracing::warn!(stream = self.shared.id.0, ?wait, "stream did not stop in time");
                    abort.abort();
                }
            }
        }
        if let Some(mut cursor) = self.cursor.take()
            && let Err(e) = cursor.close().await
        {
            tracing::debug!(error = %e, "closing cursor failed");
        }
        let connection = std::mem::replace(&mut self.connection, StreamConnection::Session);
        if let StreamConnection::Dedicated(conn) = connection {
            tokio::spawn(async move {
                if let Err(e) = conn.close().await {
                    tracing::debug!(error = %e, "closing stream connection failed");
                }
            });
        }
    }

    fn spawn_worker(&mut self) -> Result<()> {
        let cursor = self
            .cursor
            .take()
            .ok_or_else(|| EngineError::InvalidState("cursor is no longer available".into()))?;
        self.shared.set_state(StreamState::Loading);
        tracing::debug!(
            stream = self.shared.id.0,
            batch_size = self.settings.batch_size,
            "background fetch started"
        );
        self.worker = Some(tokio::spawn(fetch_until_done(
            cursor,
            self.shared.clone(),
            self.settings,
        )));
        Ok(())
    }
}

impl Drop for RowStreamer {
    fn drop(&mut self) {
        // A fetch task outliving its streamer ends after the current batch
        self.shared.stop_requested.store(true, Ordering::SeqCst);
    }
}

impl fmt::Debug for RowStreamer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RowStreamer")
            .field("id", &self.shared.id)
            .field("statement_index", &self.statement_index)
            .field("state", &self.state())
            .field("rows_fetched", &self.rows_fetched())
            .finish()
    }
}

async fn fetch_until_done(
    mut cursor: Box<dyn Cursor>,
    shared: Arc<StreamShared>,
    settings: FetchSettings,
) -> FetchOutcome {
    loop {
        if shared.stop_requested() {
            shared.finish(StreamState::Stopped, None);
            return (cursor, None);
        }
        match cursor.fetch_many(settings.batch_size).await {
            Ok(rows) if rows.is_empty() => {
                shared.finish(StreamState::Complete, None);
                return (cursor, None);
            }
            Ok(rows) => shared.deliver(rows),
            Err(e) => {
                tracing::warn!(stream = shared.id.0, error = %e, "fetch failed");
                shared.finish(StreamState::Errored, Some(e.to_string()));
                return (cursor, Some(e));
            }
        }
        if settings.pause.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(settings.pause).await;
        }
    }
}

//! Batch execution over a session connection

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use sqlstream_connection::{
    ConnectionPool, ConnectionSlot, PooledConnection, ReconnectReport, ReconnectionManager,
};
use sqlstream_core::{
    BackendAdapter, Connection, ConnectionConfig, ConnectionId, Cursor, EngineConfig, EngineError,
    Result,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use super::cancel::CancelHandle;
use super::summary::{
    BatchOutcome, ExecutionMode, ExecutionSummary, StatementReport, StatementStatus,
};
use crate::events::{EventSink, ExecutionEvent};
use crate::splitter::{Statement, split_statements};
use crate::stream::{
    FetchSettings, LargeResultGate, RowStreamer, StreamConnection, StreamHandle, StreamId,
    StreamSnapshot, StreamState, estimate_row_count,
};

const PREVIEW_CHARS: usize = 60;

/// Result of `ExecutionCoordinator::reconnect`
#[derive(Debug, Clone)]
pub struct ReconnectOutcome {
    pub report: ReconnectReport,
    /// Summary of the re-run batch when a resubmit was requested
    pub summary: Option<ExecutionSummary>,
}

/// The pool lease an execution context runs on, and the slot the
/// reconnection manager swaps when that connection is lost
struct Session {
    lease: PooledConnection,
    slot: ConnectionSlot,
}

/// Runs batches of SQL for one execution context (an editor tab, a CLI
/// invocation) and owns everything the batches open
pub struct ExecutionCoordinator {
    pool: ConnectionPool,
    adapter: Arc<dyn BackendAdapter>,
    reconnector: Arc<ReconnectionManager>,
    connection_config: ConnectionConfig,
    config: EngineConfig,
    gate: Option<Arc<dyn LargeResultGate>>,
    session: Option<Session>,
    streams: Vec<RowStreamer>,
    estimates: Vec<JoinHandle<()>>,
    next_stream: u64,
    events: EventSink,
    cancel: CancelHandle,
    last_request: Option<(String, ExecutionMode)>,
    lost_connection: Option<ConnectionId>,
    /// Dedicated connection the failing statement ran on, if any
    failed_dedicated: Option<ConnectionId>,
}

impl ExecutionCoordinator {
    pub fn new(
        pool: ConnectionPool,
        adapter: Arc<dyn BackendAdapter>,
        reconnector: Arc<ReconnectionManager>,
        connection_config: ConnectionConfig,
        config: EngineConfig,
    ) -> (Self, mpsc::UnboundedReceiver<ExecutionEvent>) {
        let (events, rx) = EventSink::channel();
        let coordinator = Self {
            pool,
            adapter,
            reconnector,
            connection_config,
            config,
            gate: None,
            session: None,
            streams: Vec::new(),
            estimates: Vec::new(),
            next_stream: 0,
            events,
            cancel: CancelHandle::default(),
            last_request: None,
            lost_connection: None,
            failed_dedicated: None,
        };
        (coordinator, rx)
    }

    /// Ask `gate` before streaming results estimated above the threshold
    pub fn with_gate(mut self, gate: Arc<dyn LargeResultGate>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Identity of the connection statements currently run on
    pub fn session_connection_id(&self) -> Option<ConnectionId> {
        self.session.as_ref().map(|session| session.slot.id())
    }

    /// Connection recorded by the last connection-loss failure
    pub fn lost_connection(&self) -> Option<ConnectionId> {
        self.lost_connection
    }

    /// Split `sql` and run it. Statement failures end the batch and are
    /// reported in the summary; `Err` means no statement could be started.
    #[tracing::instrument(skip(self, sql), fields(mode = %mode))]
    pub async fn execute(&mut self, sql: &str, mode: ExecutionMode) -> Result<ExecutionSummary> {
        self.clear_results().await;
        self.cancel.reset();
        self.last_request = Some((sql.to_string(), mode));

        let statements = split_statements(sql, self.adapter.dialect());
        let execution_id = Uuid::new_v4();
        let started_at = Utc::now();
        let started = Instant::now();

        let session = if statements.is_empty() {
            None
        } else {
            Some(self.session().await?)
        };
        self.events.emit(ExecutionEvent::BatchStarted {
            execution_id,
            mode,
            statements: statements.len(),
            started_at,
        });
        tracing::info!(%execution_id, statements = statements.len(), "batch started");

        let mut reports = Vec::with_capacity(statements.len());
        let outcome = match session {
            None => BatchOutcome::Completed,
            Some(session) => match mode {
                ExecutionMode::Query => {
                    self.run_query_mode(&statements, &session, &mut reports)
                        .await
                }
                ExecutionMode::Script => {
                    self.run_script_mode(&statements, &session, &mut reports)
                        .await
                }
            },
        };
        for (index, statement) in statements.iter().enumerate().skip(reports.len()) {
            reports.push(StatementReport::new(index, statement, StatementStatus::Skipped));
        }

        let summary = ExecutionSummary {
            execution_id,
            mode,
            started_at,
            duration: started.elapsed(),
            statements: reports,
            outcome,
        };
        tracing::info!(
            %execution_id,
            elapsed_ms = summary.duration.as_millis() as u64,
            success = summary.is_success(),
            "batch finished"
        );
        self.events
            .emit(ExecutionEvent::BatchFinished(summary.clone()));
        Ok(summary)
    }

    /// Replace the lost session connection (or the current one when nothing
    /// was lost) and optionally run the last batch again
    #[tracing::instrument(skip(self))]
    pub async fn reconnect(&mut self, resubmit: bool) -> Result<ReconnectOutcome> {
        let old_id = self
            .lost_connection
            .or_else(|| self.session_connection_id())
            .ok_or_else(|| EngineError::InvalidState("no session connection to replace".into()))?;

        // Streams may still hold cursors of the old connection
        self.clear_results().await;
        let report = self.reconnector.reconnect(old_id).await?;
        self.lost_connection = None;
        self.events.emit(ExecutionEvent::Reconnected {
            old_id: report.old_id,
            new_id: report.new_id,
        });

        let summary = match (resubmit, self.last_request.clone()) {
            (true, Some((sql, mode))) => Some(self.execute(&sql, mode).await?),
            _ => None,
        };
        Ok(ReconnectOutcome { report, summary })
    }

    // =========================================================================
    // Stream control
    // =========================================================================

    pub fn stop_stream(&self, id: StreamId) -> Result<()> {
        self.stream(id)?.stop();
        Ok(())
    }

    /// Restart background loading of a stopped or never-started stream
    pub async fn resume_stream(&mut self, id: StreamId) -> Result<()> {
        self.stream_mut(id)?.resume().await
    }

    /// Fetch one more batch of a stopped stream
    pub async fn load_more(&mut self, id: StreamId) -> Result<usize> {
        self.stream_mut(id)?.load_more().await
    }

    pub fn stream_snapshot(&self, id: StreamId) -> Option<StreamSnapshot> {
        self.stream(id).ok().map(RowStreamer::snapshot)
    }

    pub fn stream_snapshots(&self) -> Vec<StreamSnapshot> {
        self.streams.iter().map(RowStreamer::snapshot).collect()
    }

    pub fn stream_handle(&self, id: StreamId) -> Option<StreamHandle> {
        self.stream(id).ok().map(RowStreamer::handle)
    }

    /// Wait until no stream is loading in the background
    pub async fn wait_for_streams(&mut self) {
        for stream in &mut self.streams {
            stream.wait().await;
        }
    }

    /// Stop and discard every stream of the previous batch
    pub async fn clear_results(&mut self) {
        for estimate in self.estimates.drain(..) {
            estimate.abort();
        }
        let streams = std::mem::take(&mut self.streams);
        if streams.is_empty() {
            return;
        }
        let wait = self.config.teardown_wait();
        tracing::debug!(streams = streams.len(), "clearing results");
        futures::future::join_all(streams.into_iter().map(|stream| stream.close(wait))).await;
    }

    /// Stop everything, return the session lease to the pool and close any
    /// replacement connection the lease does not own
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        self.clear_results().await;
        if let Some(Session { lease, slot }) = self.session.take() {
            let current = slot.get();
            if current.id() != lease.id() {
                close_in_background(current);
            }
            drop(lease);
        }
        tracing::info!("execution context shut down");
    }

    // =========================================================================
    // Modes
    // =========================================================================

    async fn run_query_mode(
        &mut self,
        statements: &[Statement],
        session: &Arc<dyn Connection>,
        reports: &mut Vec<StatementReport>,
    ) -> BatchOutcome {
        let total = statements.len();
        for (index, statement) in statements.iter().enumerate() {
            if self.cancel.is_cancelled() {
                return BatchOutcome::Cancelled {
                    statement_index: index,
                };
            }
            self.announce(index, total, statement);
            let started = Instant::now();

            // Procedure calls are drained so every result set they return is delivered
            let result = if !statement.is_select || statement.may_return_several_sets() {
                self.run_on_session(session, index, statement, true).await
            } else if total == 1 {
                self.stream_on_session(session, index, statement).await
            } else {
                self.stream_independently(session, index, statement).await
            };
            match result {
                Ok(mut report) => {
                    report.duration = started.elapsed();
                    reports.push(report);
                }
                Err(e) => return self.fail_statement(index, statement, e, started, reports),
            }
        }
        BatchOutcome::Completed
    }

    async fn run_script_mode(
        &mut self,
        statements: &[Statement],
        session: &Arc<dyn Connection>,
        reports: &mut Vec<StatementReport>,
    ) -> BatchOutcome {
        let total = statements.len();
        let connection_id = session.id();
        let mut cursor = match session.cursor().await {
            Ok(cursor) => Some(cursor),
            Err(e) => {
                self.announce(0, total, &statements[0]);
                return self.fail_statement(0, &statements[0], e, Instant::now(), reports);
            }
        };

        let mut outcome = BatchOutcome::Completed;
        for (index, statement) in statements.iter().enumerate() {
            let Some(mut current) = cursor.take() else {
                break;
            };
            if self.cancel.is_cancelled() {
                cursor = Some(current);
                outcome = BatchOutcome::Cancelled {
                    statement_index: index,
                };
                break;
            }
            self.announce(index, total, statement);
            let started = Instant::now();

            if let Err(e) = current.execute(&statement.text).await {
                cursor = Some(current);
                outcome = self.fail_statement(index, statement, e, started, reports);
                break;
            }
            match self
                .drain_results(index, statement, current, connection_id, started)
                .await
            {
                Ok((current, mut report)) => {
                    report.duration = started.elapsed();
                    reports.push(report);
                    cursor = Some(current);
                }
                Err(e) => {
                    outcome = self.fail_statement(index, statement, e, started, reports);
                    break;
                }
            }
        }

        if let Some(mut cursor) = cursor
            && let Err(e) = cursor.close().await
        {
            tracing::debug!(error = %e, "closing script cursor failed");
        }
        // Completed work is kept even when a statement failed
        if let Err(e) = session.commit().await {
            tracing::warn!(error = %e, "commit after script failed");
        }
        outcome
    }

    // =========================================================================
    // Statement strategies
    // =========================================================================

    /// Execute on a fresh session cursor and drain whatever comes back
    async fn run_on_session(
        &mut self,
        session: &Arc<dyn Connection>,
        index: usize,
        statement: &Statement,
        commit: bool,
    ) -> Result<StatementReport> {
        let started = Instant::now();
        let cursor = open_cursor(session.as_ref(), &statement.text).await?;
        let (mut cursor, report) = self
            .drain_results(index, statement, cursor, session.id(), started)
            .await?;
        if let Err(e) = cursor.close().await {
            tracing::debug!(error = %e, "closing cursor failed");
        }
        if commit {
            session.commit().await?;
        }
        Ok(report)
    }

    /// A lone SELECT streams in the background on the session connection
    async fn stream_on_session(
        &mut self,
        session: &Arc<dyn Connection>,
        index: usize,
        statement: &Statement,
    ) -> Result<StatementReport> {
        let cursor = open_cursor(session.as_ref(), &statement.text).await?;
        if cursor.description().is_none() {
            let report = self
                .finish_without_rows(index, statement, cursor, Instant::now())
                .await;
            session.commit().await?;
            return Ok(report);
        }
        let stream = self.open_stream(index, cursor, StreamConnection::Session, session.id())?;
        let mut report = StatementReport::new(index, statement, StatementStatus::Succeeded);
        report.result_sets.push(stream.id());
        self.start_background(stream, statement).await?;
        Ok(report)
    }

    /// A SELECT among several gets a connection of its own when the backend
    /// allows it; otherwise it is drained on the session first
    async fn stream_independently(
        &mut self,
        session: &Arc<dyn Connection>,
        index: usize,
        statement: &Statement,
    ) -> Result<StatementReport> {
        if !self
            .adapter
            .supports_dedicated_connections(&self.connection_config)
        {
            return self.run_on_session(session, index, statement, false).await;
        }

        // Any failure falls back to the session; only a failure there
        // records a lost connection
        let conn = match self.adapter.create_connection(&self.connection_config).await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "no dedicated connection, using the session");
                return self.run_on_session(session, index, statement, false).await;
            }
        };
        let connection_id = conn.id();
        let cursor = match open_cursor(conn.as_ref(), &statement.text).await {
            Ok(cursor) => cursor,
            Err(e) => {
                self.failed_dedicated = Some(connection_id);
                close_in_background(conn);
                return Err(e);
            }
        };
        if cursor.description().is_none() {
            let report = self
                .finish_without_rows(index, statement, cursor, Instant::now())
                .await;
            let committed = conn.commit().await;
            close_in_background(conn);
            committed?;
            return Ok(report);
        }

        let stream = self.open_stream(
            index,
            cursor,
            StreamConnection::Dedicated(conn),
            connection_id,
        )?;
        let mut report = StatementReport::new(index, statement, StatementStatus::Succeeded);
        report.result_sets.push(stream.id());
        self.start_background(stream, statement).await?;
        Ok(report)
    }

    /// Drain every result of an executed statement and hand the cursor back
    async fn drain_results(
        &mut self,
        index: usize,
        statement: &Statement,
        mut cursor: Box<dyn Cursor>,
        connection_id: ConnectionId,
        started: Instant,
    ) -> Result<(Box<dyn Cursor>, StatementReport)> {
        let mut report = StatementReport::new(index, statement, StatementStatus::Succeeded);
        loop {
            if cursor.description().is_some() {
                let mut stream =
                    self.open_stream(index, cursor, StreamConnection::Session, connection_id)?;
                report.result_sets.push(stream.id());
                let drained = stream.drain().await;
                let stopped = stream.state() == StreamState::Stopped;
                let detached = stream.detach_cursor();
                self.streams.push(stream);
                drained?;
                if stopped {
                    return Err(EngineError::Cancelled);
                }
                cursor = detached.ok_or_else(|| {
                    EngineError::InvalidState("stream kept the session cursor".into())
                })?;
            } else {
                self.report_rows_affected(index, &mut report, cursor.rowcount(), started);
            }
            if !cursor.next_set().await? {
                break;
            }
        }
        Ok((cursor, report))
    }

    async fn finish_without_rows(
        &self,
        index: usize,
        statement: &Statement,
        mut cursor: Box<dyn Cursor>,
        started: Instant,
    ) -> StatementReport {
        let mut report = StatementReport::new(index, statement, StatementStatus::Succeeded);
        self.report_rows_affected(index, &mut report, cursor.rowcount(), started);
        if let Err(e) = cursor.close().await {
            tracing::debug!(error = %e, "closing cursor failed");
        }
        report
    }

    // =========================================================================
    // Streams
    // =========================================================================

    fn open_stream(
        &mut self,
        index: usize,
        cursor: Box<dyn Cursor>,
        connection: StreamConnection,
        connection_id: ConnectionId,
    ) -> Result<RowStreamer> {
        self.next_stream += 1;
        let id = StreamId(self.next_stream);
        let dedicated = connection.is_dedicated();
        let stream = RowStreamer::new(
            id,
            index,
            cursor,
            connection,
            connection_id,
            FetchSettings::from_engine(&self.config),
            self.events.clone(),
        )?;
        self.cancel.track(stream.handle());
        tracing::debug!(stream_id = id.0, %connection_id, dedicated, "result set opened");
        self.events.emit(ExecutionEvent::ResultSetOpened {
            stream_id: id,
            index,
            columns: stream.columns().to_vec(),
            connection_id,
            dedicated,
        });
        Ok(stream)
    }

    /// Start background loading, subject to the large-result gate, and keep
    /// the stream
    async fn start_background(
        &mut self,
        mut stream: RowStreamer,
        statement: &Statement,
    ) -> Result<()> {
        let can_estimate = self
            .adapter
            .supports_dedicated_connections(&self.connection_config);
        let gated = match (self.config.large_dataset_threshold, self.gate.clone()) {
            (Some(threshold), Some(gate)) if can_estimate => Some((threshold, gate)),
            _ => None,
        };

        let Some((threshold, gate)) = gated else {
            launch(&mut stream)?;
            if can_estimate {
                self.spawn_estimate(stream.handle(), statement);
            }
            self.streams.push(stream);
            return Ok(());
        };

        let estimate = estimate_row_count(
            &self.pool,
            self.adapter.as_ref(),
            &statement.text,
            self.config.estimate_timeout(),
        )
        .await;
        if let Some(total) = estimate {
            stream.handle().set_total_expected(total);
            self.events.emit(ExecutionEvent::RowCountEstimated {
                stream_id: stream.id(),
                total,
            });
            if total > threshold && !gate.confirm(statement, total).await {
                tracing::info!(stream_id = stream.id().0, total, threshold, "large result deferred");
                self.events.emit(ExecutionEvent::LargeResultDeferred {
                    stream_id: stream.id(),
                    estimated: total,
                });
                self.streams.push(stream);
                return Ok(());
            }
        }
        launch(&mut stream)?;
        self.streams.push(stream);
        Ok(())
    }

    fn spawn_estimate(&mut self, handle: StreamHandle, statement: &Statement) {
        let pool = self.pool.clone();
        let adapter = self.adapter.clone();
        let events = self.events.clone();
        let sql = statement.text.clone();
        let timeout = self.config.estimate_timeout();
        self.estimates.push(tokio::spawn(async move {
            if let Some(total) = estimate_row_count(&pool, adapter.as_ref(), &sql, timeout).await {
                handle.set_total_expected(total);
                events.emit(ExecutionEvent::RowCountEstimated {
                    stream_id: handle.id(),
                    total,
                });
            }
        }));
    }

    fn stream(&self, id: StreamId) -> Result<&RowStreamer> {
        self.streams
            .iter()
            .find(|stream| stream.id() == id)
            .ok_or_else(|| EngineError::InvalidState(format!("unknown {}", id)))
    }

    fn stream_mut(&mut self, id: StreamId) -> Result<&mut RowStreamer> {
        self.streams
            .iter_mut()
            .find(|stream| stream.id() == id)
            .ok_or_else(|| EngineError::InvalidState(format!("unknown {}", id)))
    }

    // =========================================================================
    // Session and reporting
    // =========================================================================

    async fn session(&mut self) -> Result<Arc<dyn Connection>> {
        if let Some(session) = &self.session {
            return Ok(session.slot.get());
        }
        let lease = self.pool.acquire().await?;
        let slot = ConnectionSlot::new(lease.connection());
        self.reconnector.register(&slot);
        tracing::info!(connection_id = %slot.id(), "session connection acquired");

        let connection = slot.get();
        self.session = Some(Session { lease, slot });
        Ok(connection)
    }

    fn announce(&self, index: usize, total: usize, statement: &Statement) {
        let preview = statement.preview(PREVIEW_CHARS);
        tracing::debug!(
            statement = index + 1,
            total,
            sql_preview = %preview,
            "executing statement"
        );
        self.events.emit(ExecutionEvent::StatementStarted {
            index,
            total,
            line_start: statement.line_start,
            line_end: statement.line_end,
            preview,
        });
    }

    fn report_rows_affected(
        &self,
        index: usize,
        report: &mut StatementReport,
        rowcount: i64,
        started: Instant,
    ) {
        let rows = u64::try_from(rowcount).unwrap_or(0);
        report.add_rows_affected(rows);
        self.events.emit(ExecutionEvent::RowsAffected {
            index,
            rows,
            elapsed: started.elapsed(),
        });
    }

    fn fail_statement(
        &mut self,
        index: usize,
        statement: &Statement,
        error: EngineError,
        started: Instant,
        reports: &mut Vec<StatementReport>,
    ) -> BatchOutcome {
        let dedicated = self.failed_dedicated.take();
        let mut report = StatementReport::new(index, statement, StatementStatus::Failed);
        report.duration = started.elapsed();

        if matches!(error, EngineError::Cancelled) {
            report.status = StatementStatus::Cancelled;
            reports.push(report);
            return BatchOutcome::Cancelled {
                statement_index: index,
            };
        }

        let connection_lost = self.adapter.classify_error(&error).is_connection_loss();
        let error = error.at_statement(index, statement.line_start, statement.line_end);
        let message = error.to_string();
        tracing::warn!(statement = index + 1, connection_lost, error = %error, "statement failed");

        report.error = Some(message.clone());
        reports.push(report);
        self.events.emit(ExecutionEvent::StatementFailed {
            index,
            line_start: statement.line_start,
            line_end: statement.line_end,
            message: message.clone(),
            connection_lost,
        });
        if connection_lost && let Some(connection_id) = dedicated {
            // Already closed; the session is untouched
            tracing::warn!(%connection_id, "dedicated connection lost");
        } else if connection_lost && let Some(connection_id) = self.session_connection_id() {
            self.lost_connection = Some(connection_id);
            self.events.emit(ExecutionEvent::ConnectionLost {
                connection_id,
                message: error.root().to_string(),
            });
        }

        BatchOutcome::Failed {
            statement_index: index,
            message,
            connection_lost,
        }
    }
}

impl Drop for ExecutionCoordinator {
    /// Dropped without `shutdown`: a session cursor still loading in the
    /// background keeps the session connection out of the pool
    fn drop(&mut self) {
        self.cancel.cancel();
        for estimate in &self.estimates {
            estimate.abort();
        }
        let Some(Session { lease, slot }) = self.session.take() else {
            return;
        };
        let session_id = slot.id();
        let busy = self
            .streams
            .iter()
            .any(|stream| stream.connection_id() == session_id && stream.is_loading());

        if session_id != lease.id() {
            // The lease holds the dead connection; the replacement is ours
            close_in_background(slot.get());
            lease.discard();
        } else if busy {
            tracing::warn!(connection_id = %session_id, "dropped while streaming, closing session connection");
            lease.discard();
        }
    }
}

async fn open_cursor(conn: &dyn Connection, sql: &str) -> Result<Box<dyn Cursor>> {
    let mut cursor = conn.cursor().await?;
    cursor.execute(sql).await?;
    Ok(cursor)
}

/// Start a stream unless it was stopped (cancelled) before it could begin
fn launch(stream: &mut RowStreamer) -> Result<()> {
    if stream.state() == StreamState::Idle {
        stream.start()?;
    }
    Ok(())
}

fn close_in_background(conn: Arc<dyn Connection>) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if let Err(e) = conn.close().await {
                    tracing::debug!(error = %e, "closing connection failed");
                }
            });
        }
        // Without a runtime the connection closes when its last handle drops
        Err(_) => drop(conn),
    }
}

//! Progress events
//!
//! Everything the engine reports while a batch runs goes through one
//! unbounded channel. Rows travel in `RowBatch` events, so a front end
//! receives each fetched row exactly once and the engine keeps none of them.

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlstream_core::{ColumnMeta, ConnectionId, Row};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::coordinator::{ExecutionMode, ExecutionSummary};
use crate::stream::{StreamId, StreamState};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
    BatchStarted {
        execution_id: Uuid,
        mode: ExecutionMode,
        statements: usize,
        started_at: DateTime<Utc>,
    },
    StatementStarted {
        index: usize,
        total: usize,
        line_start: usize,
        line_end: usize,
        preview: String,
    },
    RowsAffected {
        index: usize,
        rows: u64,
        elapsed: Duration,
    },
    ResultSetOpened {
        stream_id: StreamId,
        index: usize,
        columns: Vec<ColumnMeta>,
        connection_id: ConnectionId,
        dedicated: bool,
    },
    RowBatch {
        stream_id: StreamId,
        /// Position of the first row within the result set
        offset: u64,
        rows: Vec<Row>,
    },
    RowCountEstimated {
        stream_id: StreamId,
        total: u64,
    },
    /// The estimate exceeded the configured threshold and streaming was not
    /// confirmed; the stream stays idle until resumed
    LargeResultDeferred {
        stream_id: StreamId,
        estimated: u64,
    },
    StreamFinished {
        stream_id: StreamId,
        state: StreamState,
        rows_fetched: u64,
        error: Option<String>,
    },
    StatementFailed {
        index: usize,
        line_start: usize,
        line_end: usize,
        message: String,
        connection_lost: bool,
    },
    ConnectionLost {
        connection_id: ConnectionId,
        message: String,
    },
    Reconnected {
        old_id: ConnectionId,
        new_id: ConnectionId,
    },
    BatchFinished(ExecutionSummary),
}

impl fmt::Display for ExecutionEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionEvent::BatchStarted {
                mode, statements, ..
            } => write!(f, "running {} statement(s) in {} mode", statements, mode),
            ExecutionEvent::StatementStarted {
                index,
                total,
                line_start,
                line_end,
                preview,
            } => write!(
                f,
                "statement {}/{} (lines {}-{}): {}",
                index + 1,
                total,
                line_start,
                line_end,
                preview
            ),
            ExecutionEvent::RowsAffected {
                index,
                rows,
                elapsed,
            } => write!(
                f,
                "statement {}: {} row(s) affected in {}ms",
                index + 1,
                rows,
                elapsed.as_millis()
            ),
            ExecutionEvent::ResultSetOpened {
                stream_id, columns, ..
            } => write!(f, "{} opened with {} column(s)", stream_id, columns.len()),
            ExecutionEvent::RowBatch {
                stream_id,
                offset,
                rows,
            } => write!(
                f,
                "{}: rows {}-{}",
                stream_id,
                offset + 1,
                offset + rows.len() as u64
            ),
            ExecutionEvent::RowCountEstimated { stream_id, total } => {
                write!(f, "{}: about {} row(s) expected", stream_id, total)
            }
            ExecutionEvent::LargeResultDeferred {
                stream_id,
                estimated,
            } => write!(
                f,
                "{}: about {} row(s); waiting for confirmation before streaming",
                stream_id, estimated
            ),
            ExecutionEvent::StreamFinished {
                stream_id,
                state,
                rows_fetched,
                error,
            } => match error {
                Some(error) => write!(
                    f,
                    "{}: failed after {} row(s): {}",
                    stream_id, rows_fetched, error
                ),
                None if *state == StreamState::Stopped => {
                    write!(f, "{}: stopped after {} row(s)", stream_id, rows_fetched)
                }
                None => write!(f, "{}: {} row(s) returned", stream_id, rows_fetched),
            },
            ExecutionEvent::StatementFailed { message, .. } => write!(f, "{}", message),
            ExecutionEvent::ConnectionLost {
                connection_id,
                message,
            } => write!(f, "connection {} lost: {}", connection_id, message),
            ExecutionEvent::Reconnected { old_id, new_id } => {
                write!(f, "reconnected: {} replaced by {}", old_id, new_id)
            }
            ExecutionEvent::BatchFinished(summary) => write!(f, "{}", summary),
        }
    }
}

/// Sending half of the event channel. Sends never fail: events for a
/// receiver that has gone away are dropped.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<ExecutionEvent>,
}

impl EventSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ExecutionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, event: ExecutionEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("event receiver dropped");
        }
    }
}

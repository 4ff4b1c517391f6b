//! sqlstream query - statement execution and result streaming
//!
//! - `splitter` turns SQL text into statements (and T-SQL batches)
//! - `stream` delivers a cursor's rows in bounded batches, in the background
//!   or inline, with stop / resume / load-more control
//! - `coordinator` runs a batch of statements in query or script mode and
//!   reports progress as `ExecutionEvent`s

pub mod coordinator;
pub mod events;
pub mod splitter;
pub mod stream;

#[cfg(test)]
mod test_helpers;

pub use coordinator::{
    BatchOutcome, CancelHandle, ExecutionCoordinator, ExecutionMode, ExecutionSummary,
    ReconnectOutcome, StatementReport, StatementStatus,
};
pub use events::{EventSink, ExecutionEvent};
pub use splitter::{Batch, Statement, split_batches, split_statements};
pub use stream::{
    FetchSettings, FixedAnswer, LargeResultGate, RowStreamer, StreamConnection, StreamHandle,
    StreamId, StreamSnapshot, StreamState,
};

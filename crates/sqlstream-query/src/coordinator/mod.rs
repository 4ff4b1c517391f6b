//! Batch execution
//!
//! `ExecutionCoordinator` runs the statements of a script against one
//! session connection taken from the pool:
//!
//! - **Query mode**: statements are independent. Each SELECT of a multi-
//!   statement batch streams on a connection of its own when the backend
//!   allows it; other statements run on the session and commit immediately.
//! - **Script mode**: one session cursor runs everything in order, draining
//!   every result before the next statement, and commits once at the end.
//!
//! The first failing statement halts the batch. Failures the adapter
//! classifies as connection loss are announced with `ConnectionLost`, after
//! which `reconnect` swaps in a fresh connection and may re-run the batch.

mod cancel;
mod executor;
mod summary;

pub use cancel::CancelHandle;
pub use executor::{ExecutionCoordinator, ReconnectOutcome};
pub use summary::{
    BatchOutcome, ExecutionMode, ExecutionSummary, StatementReport, StatementStatus,
};

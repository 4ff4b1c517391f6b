//! Incremental result streaming
//!
//! A `RowStreamer` owns one open cursor and moves its rows to the event
//! channel in batches of `batch_size`:
//!
//! ```text
//!   Idle --start--> Loading --exhausted--> Complete
//!    |                 |  \--fetch error--> Errored
//!   stop             stop
//!    v                 v
//!   Stopped <----------+   (resume -> Loading, load_more -> one batch)
//! ```
//!
//! Background fetching runs on a tokio task that owns the cursor and hands
//! it back when it ends, so at most one fetch is ever in flight per cursor.

mod estimate;
mod gate;
mod streamer;

pub use estimate::estimate_row_count;
pub use gate::{FixedAnswer, LargeResultGate};
pub use streamer::{
    FetchSettings, RowStreamer, StreamConnection, StreamHandle, StreamId, StreamSnapshot,
    StreamState,
};

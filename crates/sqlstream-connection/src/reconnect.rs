//! Reconnection after connection loss
//!
//! Execution contexts register the `ConnectionSlot`s they work through.
//! When a statement fails with an error the adapter classifies as
//! connection loss, the front end may ask for a reconnect: the manager
//! opens one replacement connection and installs it in every registered
//! slot that still points at the lost connection.
//!
//! There is no automatic retry; a failed reconnect is reported and the
//! caller decides whether to try again.

mod manager;


pub use manager::{ReconnectReport, ReconnectionManager};

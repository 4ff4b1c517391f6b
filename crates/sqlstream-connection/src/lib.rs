//! Connection management for sqlstream
//!
//! - `ConnectionPool` - bounded pool of reusable connections per database
//! - `ConnectionFactory` - how the pool and the reconnection manager open
//!   connections
//! - `ConnectionSlot` - a swappable connection reference held by an
//!   execution context
//! - `ReconnectionManager` - replaces a lost connection in every context
//!   that depends on it

mod factory;
mod pool;
pub mod probe;
mod reconnect;
mod slot;

#[cfg(test)]
mod test_helpers;

pub use factory::{AdapterConnectionFactory, ConnectionFactory};
pub use pool::{ConnectionPool, PoolConfig, PoolStats, PooledConnection};
pub use reconnect::{ReconnectReport, ReconnectionManager};
pub use slot::{ConnectionSlot, WeakConnectionSlot};

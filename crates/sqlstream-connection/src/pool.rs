//! Connection pooling for one target database
//!
//! The pool is bounded by `max_size` connections. `acquire` prefers an idle
//! connection that passes the liveness probe, creates a new one while under
//! the limit, and otherwise waits for a release until the acquire timeout.
//!
//! # Example
//!
//! ```ignore
//! use sqlstream_connection::{AdapterConnectionFactory, ConnectionPool, PoolConfig};
//!
//! let factory = AdapterConnectionFactory::new(adapter, config);
//! let pool = ConnectionPool::new(PoolConfig::new(5), factory);
//! let conn = pool.acquire().await?;
//! // Connection returned to pool on drop
//! ```

mod config;
mod pool;
mod stats;

#[cfg(test)]
mod tests;

pub use config::PoolConfig;
pub use pool::{ConnectionPool, PooledConnection};
pub use stats::PoolStats;

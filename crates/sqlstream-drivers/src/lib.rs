//! sqlstream drivers - backend adapters
//!
//! One `BackendAdapter` per supported backend. SQLite ships with a real
//! driver built on rusqlite; the server backends build their connection
//! strings here and open connections through an embedder-supplied
//! `Connector`.

mod access;
mod connector;
pub mod count;
pub mod markers;
mod mysql;
mod postgres;
mod registry;
pub mod sqlite;
mod sqlserver;

pub use access::AccessAdapter;
pub use mysql::MySqlAdapter;
pub use postgres::PostgresAdapter;
pub use registry::AdapterRegistry;
pub use sqlite::{SqliteAdapter, SqliteConnection};
pub use sqlserver::SqlServerAdapter;

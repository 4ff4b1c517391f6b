//! Built-in SQLite backend

mod connection;
mod worker;

use std::sync::Arc;

use async_trait::async_trait;
use sqlstream_core::{
    BackendAdapter, Connection, ConnectionConfig, Dialect, EngineError, ErrorClass, Result,
};

pub use connection::{SqliteConnection, SqliteCursor};

use crate::markers::{self, BackendMarkers};

const SQLITE_MARKERS: BackendMarkers = BackendMarkers {
    messages: &["unable to open database file", "disk i/o error"],
    codes: &["CannotOpen", "SystemIoFailure"],
};

/// Adapter for SQLite databases, backed by rusqlite
#[derive(Debug, Default, Clone, Copy)]
pub struct SqliteAdapter;

impl SqliteAdapter {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BackendAdapter for SqliteAdapter {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn create_connection(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>> {
        let path = self.connection_string(config)?;
        let connection = SqliteConnection::open(&path).await?;
        Ok(Arc::new(connection))
    }

    fn connection_string(&self, config: &ConnectionConfig) -> Result<String> {
        if config.dialect != Dialect::Sqlite {
            return Err(EngineError::Configuration(format!(
                "SQLite adapter cannot open a {} connection",
                config.dialect
            )));
        }
        Ok(config
            .database
            .clone()
            .filter(|db| !db.is_empty())
            .unwrap_or_else(|| ":memory:".to_string()))
    }

    fn build_count_wrapper(&self, sql: &str) -> Option<String> {
        crate::count::build_count_wrapper(sql, Dialect::Sqlite)
    }

    fn classify_error(&self, error: &EngineError) -> ErrorClass {
        markers::classify(error, &SQLITE_MARKERS)
    }

    /// A second connection to an in-memory database opens a different,
    /// empty database
    fn supports_dedicated_connections(&self, config: &ConnectionConfig) -> bool {
        !config.is_in_memory()
    }
}

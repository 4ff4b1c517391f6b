//! Driver-layer contract
//!
//! Backends are reached through DB-API style handles: a `Connection` hands
//! out `Cursor`s, a cursor executes one statement at a time and yields its
//! rows in bounded batches.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{ColumnMeta, Dialect, Result, Row};

/// Identity of one physical backend connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An open backend connection
///
/// A connection is shared behind an `Arc` but is only ever driven by one
/// statement execution or result stream at a time.
#[async_trait]
pub trait Connection: Send + Sync {
    fn id(&self) -> ConnectionId;

    fn dialect(&self) -> Dialect;

    /// Open a new cursor on this connection
    async fn cursor(&self) -> Result<Box<dyn Cursor>>;

    /// Execute a statement that returns no rows, returning the affected count
    async fn execute(&self, sql: &str) -> Result<u64> {
        let mut cursor = self.cursor().await?;
        cursor.execute(sql).await?;
        let affected = cursor.rowcount().max(0) as u64;
        cursor.close().await?;
        Ok(affected)
    }

    async fn commit(&self) -> Result<()>;

    async fn rollback(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}

/// A driver cursor over one executing statement
#[async_trait]
pub trait Cursor: Send {
    /// Execute a statement; row-returning statements leave a pending result set
    async fn execute(&mut self, sql: &str) -> Result<()>;

    /// Fetch up to `size` rows; an empty batch means the result set is exhausted
    async fn fetch_many(&mut self, size: usize) -> Result<Vec<Row>>;

    /// Fetch every remaining row of the current result set
    async fn fetch_all(&mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        loop {
            let batch = self.fetch_many(1000).await?;
            if batch.is_empty() {
                return Ok(rows);
            }
            rows.extend(batch);
        }
    }

    /// Column metadata of the current result set; `None` when the statement
    /// returned no rows
    fn description(&self) -> Option<&[ColumnMeta]>;

    /// Rows affected by the last statement, -1 when not applicable
    fn rowcount(&self) -> i64;

    /// Advance to the next result set, returning `false` when there is none
    async fn next_set(&mut self) -> Result<bool> {
        Ok(false)
    }

    async fn close(&mut self) -> Result<()>;
}

/// Opens connections for backends whose driver lives outside this workspace
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        config: &ConnectionConfig,
        connection_string: &str,
    ) -> Result<Arc<dyn Connection>>;
}

/// Definition of a target database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Unique identifier
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    /// Display name
    #[serde(default)]
    pub name: String,
    pub dialect: Dialect,
    /// Host address (empty for file-based databases)
    #[serde(default)]
    pub host: String,
    /// Port number (0 for default or file-based)
    #[serde(default)]
    pub port: u16,
    /// Database name or file path
    #[serde(default)]
    pub database: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, skip_serializing)]
    pub password: Option<String>,
    /// Additional driver parameters
    #[serde(default)]
    pub params: HashMap<String, String>,
}

impl ConnectionConfig {
    pub fn new(dialect: Dialect, name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            dialect,
            host: String::new(),
            port: 0,
            database: None,
            username: None,
            password: None,
            params: HashMap::new(),
        }
    }

    /// Create a SQLite configuration
    pub fn new_sqlite(database_path: &str) -> Self {
        let mut config = Self::new(Dialect::Sqlite, "SQLite Database");
        config.database = Some(database_path.to_string());
        config
    }

    /// Create a configuration for a networked server
    pub fn new_server(dialect: Dialect, host: &str, port: u16, database: &str, username: &str) -> Self {
        let mut config = Self::new(dialect, dialect.display_name());
        config.host = host.to_string();
        config.port = port;
        config.database = Some(database.to_string());
        config.username = Some(username.to_string());
        config
    }

    /// Create a configuration for a file-based Access database
    pub fn new_access(file_path: &str) -> Self {
        let mut config = Self::new(Dialect::Access, "Access Database");
        config.database = Some(file_path.to_string());
        config
    }

    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(password.to_string());
        self
    }

    pub fn with_param(mut self, key: &str, value: &str) -> Self {
        self.params.insert(key.to_string(), value.to_string());
        self
    }

    pub fn get_param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    /// Whether the database lives only inside a single connection
    pub fn is_in_memory(&self) -> bool {
        match self.database.as_deref() {
            None => self.dialect == Dialect::Sqlite,
            Some(db) => db.is_empty() || db == ":memory:" || db.contains("mode=memory"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_detection() {
        assert!(ConnectionConfig::new_sqlite(":memory:").is_in_memory());
        assert!(ConnectionConfig::new(Dialect::Sqlite, "scratch").is_in_memory());
        assert!(!ConnectionConfig::new_sqlite("/tmp/app.db").is_in_memory());
    }

    #[test]
    fn test_password_is_not_serialized() {
        let config = ConnectionConfig::new_server(Dialect::PostgreSql, "db", 5432, "app", "me")
            .with_password("secret");
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
        assert!(json.contains("\"dialect\":\"postgresql\""));
    }

    #[test]
    fn test_minimal_toml_definition() {
        let config: ConnectionConfig = toml::from_str(
            "dialect = \"sqlserver\"\nhost = \"sql01\"\nport = 1433\ndatabase = \"sales\"\n\n[params]\nEncrypt = \"yes\"\n",
        )
        .unwrap();
        assert_eq!(config.dialect, Dialect::SqlServer);
        assert_eq!(config.get_param("Encrypt"), Some("yes"));
        assert!(config.name.is_empty());
        assert!(config.password.is_none());
    }
}

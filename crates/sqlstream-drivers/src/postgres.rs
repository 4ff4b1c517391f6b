//! PostgreSQL backend

use std::sync::Arc;

use async_trait::async_trait;
use sqlstream_core::{
    BackendAdapter, Connection, ConnectionConfig, Connector, Dialect, EngineError, ErrorClass,
    Result,
};

use crate::connector::{connect_via, sorted_params};
use crate::markers::{self, BackendMarkers};

const POSTGRES_MARKERS: BackendMarkers = BackendMarkers {
    messages: &[
        "server closed the connection unexpectedly",
        "terminating connection due to administrator command",
        "connection reset by peer",
        "could not connect to server",
        "no connection to the server",
    ],
    // admin_shutdown, crash_shutdown
    codes: &["57P01", "57P02"],
};

#[derive(Clone, Default)]
pub struct PostgresAdapter {
    connector: Option<Arc<dyn Connector>>,
}

impl PostgresAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }
}

/// Quote a libpq keyword/value entry when needed
fn libpq_value(value: &str) -> String {
    if !value.is_empty() && !value.contains([' ', '\'', '\\']) {
        return value.to_string();
    }
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}

#[async_trait]
impl BackendAdapter for PostgresAdapter {
    fn dialect(&self) -> Dialect {
        Dialect::PostgreSql
    }

    async fn create_connection(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>> {
        let connection_string = self.connection_string(config)?;
        connect_via(
            self.connector.as_ref(),
            Dialect::PostgreSql,
            config,
            connection_string,
        )
        .await
    }

    fn connection_string(&self, config: &ConnectionConfig) -> Result<String> {
        let host = if config.host.is_empty() {
            "localhost"
        } else {
            config.host.as_str()
        };
        let port = if config.port == 0 { 5432 } else { config.port };

        let mut parts = vec![
            format!("host={}", libpq_value(host)),
            format!("port={}", port),
        ];
        if let Some(database) = &config.database {
            parts.push(format!("dbname={}", libpq_value(database)));
        }
        if let Some(user) = &config.username {
            parts.push(format!("user={}", libpq_value(user)));
        }
        if let Some(password) = &config.password {
            parts.push(format!("password={}", libpq_value(password)));
        }
        for (key, value) in sorted_params(config) {
            parts.push(format!("{}={}", key, libpq_value(value)));
        }
        Ok(parts.join(" "))
    }

    fn build_count_wrapper(&self, sql: &str) -> Option<String> {
        crate::count::build_count_wrapper(sql, Dialect::PostgreSql)
    }

    fn classify_error(&self, error: &EngineError) -> ErrorClass {
        markers::classify(error, &POSTGRES_MARKERS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_connection_string() {
        let config =
            ConnectionConfig::new_server(Dialect::PostgreSql, "pg.local", 0, "app", "reader")
                .with_password("it's secret")
                .with_param("sslmode", "require");
        assert_eq!(
            PostgresAdapter::new().connection_string(&config).unwrap(),
            "host=pg.local port=5432 dbname=app user=reader password='it\\'s secret' sslmode=require"
        );
    }

    #[test]
    fn test_admin_shutdown_code_is_connection_loss() {
        let err = EngineError::driver_with_code("57P01", "terminating connection");
        assert_eq!(
            PostgresAdapter::new().classify_error(&err),
            ErrorClass::ConnectionLoss
        );
        let err = EngineError::driver_with_code("42P01", "relation \"missing\" does not exist");
        assert_eq!(
            PostgresAdapter::new().classify_error(&err),
            ErrorClass::Execution
        );
    }
}

//! SQL Server backend (ODBC)

use std::sync::Arc;

use async_trait::async_trait;
use sqlstream_core::{
    BackendAdapter, Connection, ConnectionConfig, Connector, Dialect, EngineError, ErrorClass,
    Result,
};

use crate::connector::{connect_via, odbc_value, sorted_params};
use crate::markers::{self, BackendMarkers};

const DEFAULT_ODBC_DRIVER: &str = "ODBC Driver 17 for SQL Server";

const SQLSERVER_MARKERS: BackendMarkers = BackendMarkers {
    messages: &[
        "tcp provider",
        "transport-level error",
        "physical connection is not usable",
        "the connection is broken",
    ],
    codes: &[],
};

#[derive(Clone, Default)]
pub struct SqlServerAdapter {
    connector: Option<Arc<dyn Connector>>,
}

impl SqlServerAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }
}

#[async_trait]
impl BackendAdapter for SqlServerAdapter {
    fn dialect(&self) -> Dialect {
        Dialect::SqlServer
    }

    async fn create_connection(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>> {
        let connection_string = self.connection_string(config)?;
        connect_via(
            self.connector.as_ref(),
            Dialect::SqlServer,
            config,
            connection_string,
        )
        .await
    }

    fn connection_string(&self, config: &ConnectionConfig) -> Result<String> {
        if config.host.is_empty() {
            return Err(EngineError::Configuration(
                "SQL Server connection requires a host".into(),
            ));
        }
        let driver = config.get_param("driver").unwrap_or(DEFAULT_ODBC_DRIVER);
        let server = if config.port == 0 {
            config.host.clone()
        } else {
            format!("{},{}", config.host, config.port)
        };

        let mut parts = vec![
            format!("DRIVER={{{}}}", driver),
            format!("SERVER={}", odbc_value(&server)),
        ];
        if let Some(database) = &config.database {
            parts.push(format!("DATABASE={}", odbc_value(database)));
        }
        match &config.username {
            Some(user) => {
                parts.push(format!("UID={}", odbc_value(user)));
                if let Some(password) = &config.password {
                    parts.push(format!("PWD={}", odbc_value(password)));
                }
            }
            None => parts.push("Trusted_Connection=yes".to_string()),
        }
        for (key, value) in sorted_params(config) {
            if key != "driver" {
                parts.push(format!("{}={}", key, odbc_value(value)));
            }
        }
        Ok(parts.join(";") + ";")
    }

    fn build_count_wrapper(&self, sql: &str) -> Option<String> {
        crate::count::build_count_wrapper(sql, Dialect::SqlServer)
    }

    fn classify_error(&self, error: &EngineError) -> ErrorClass {
        markers::classify(error, &SQLSERVER_MARKERS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_connection_string_with_credentials() {
        let config = ConnectionConfig::new_server(Dialect::SqlServer, "db01", 1433, "sales", "sa")
            .with_password("p;w")
            .with_param("Encrypt", "yes");
        assert_eq!(
            SqlServerAdapter::new().connection_string(&config).unwrap(),
            "DRIVER={ODBC Driver 17 for SQL Server};SERVER=db01,1433;DATABASE=sales;UID=sa;PWD={p;w};Encrypt=yes;"
        );
    }

    #[test]
    fn test_trusted_connection_without_user() {
        let mut config = ConnectionConfig::new(Dialect::SqlServer, "local");
        config.host = "localhost".into();
        let conn_str = SqlServerAdapter::new().connection_string(&config).unwrap();
        assert!(conn_str.contains("SERVER=localhost;"));
        assert!(conn_str.contains("Trusted_Connection=yes"));
    }

    #[test]
    fn test_transport_errors_are_connection_loss() {
        let err = EngineError::driver(
            "A transport-level error has occurred when receiving results from the server",
        );
        assert_eq!(
            SqlServerAdapter::new().classify_error(&err),
            ErrorClass::ConnectionLoss
        );
        let err = EngineError::driver_with_code("42000", "Incorrect syntax near 'FROM'");
        assert_eq!(
            SqlServerAdapter::new().classify_error(&err),
            ErrorClass::Execution
        );
    }
}

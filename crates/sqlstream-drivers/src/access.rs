//! Microsoft Access backend (ODBC)

use std::sync::Arc;

use async_trait::async_trait;
use sqlstream_core::{
    BackendAdapter, Connection, ConnectionConfig, Connector, Dialect, EngineError, ErrorClass,
    Result,
};

use crate::connector::{connect_via, odbc_value, sorted_params};
use crate::markers::{self, BackendMarkers};

const ACCESS_ODBC_DRIVER: &str = "Microsoft Access Driver (*.mdb, *.accdb)";

const ACCESS_MARKERS: BackendMarkers = BackendMarkers {
    messages: &["disk or network error", "network access has been interrupted"],
    codes: &[],
};

#[derive(Clone, Default)]
pub struct AccessAdapter {
    connector: Option<Arc<dyn Connector>>,
}

impl AccessAdapter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }
}

#[async_trait]
impl BackendAdapter for AccessAdapter {
    fn dialect(&self) -> Dialect {
        Dialect::Access
    }

    async fn create_connection(&self, config: &ConnectionConfig) -> Result<Arc<dyn Connection>> {
        let connection_string = self.connection_string(config)?;
        connect_via(
            self.connector.as_ref(),
            Dialect::Access,
            config,
            connection_string,
        )
        .await
    }

    fn connection_string(&self, config: &ConnectionConfig) -> Result<String> {
        let file = config
            .database
            .as_deref()
            .filter(|db| !db.is_empty())
            .ok_or_else(|| {
                EngineError::Configuration("Access connection requires a database file".into())
            })?;

        let mut parts = vec![
            format!("DRIVER={{{}}}", ACCESS_ODBC_DRIVER),
            format!("DBQ={}", odbc_value(file)),
        ];
        if let Some(user) = &config.username {
            parts.push(format!("UID={}", odbc_value(user)));
        }
        if let Some(password) = &config.password {
            parts.push(format!("PWD={}", odbc_value(password)));
        }
        for (key, value) in sorted_params(config) {
            parts.push(format!("{}={}", key, odbc_value(value)));
        }
        Ok(parts.join(";") + ";")
    }

    fn build_count_wrapper(&self, sql: &str) -> Option<String> {
        crate::count::build_count_wrapper(sql, Dialect::Access)
    }

    fn classify_error(&self, error: &EngineError) -> ErrorClass {
        markers::classify(error, &ACCESS_MARKERS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_string_points_at_file() {
        let config = ConnectionConfig::new_access("C:\\data\\inventory.accdb");
        assert_eq!(
            AccessAdapter::new().connection_string(&config).unwrap(),
            "DRIVER={Microsoft Access Driver (*.mdb, *.accdb)};DBQ=C:\\data\\inventory.accdb;"
        );
    }

    #[test]
    fn test_missing_file_is_configuration_error() {
        let config = ConnectionConfig::new(Dialect::Access, "empty");
        assert!(matches!(
            AccessAdapter::new().connection_string(&config),
            Err(EngineError::Configuration(_))
        ));
    }
}

//! Shared plumbing for adapters whose driver is supplied by the embedder

use std::sync::Arc;

use sqlstream_core::{Connection, ConnectionConfig, Connector, Dialect, EngineError, Result};

pub(crate) async fn connect_via(
    connector: Option<&Arc<dyn Connector>>,
    dialect: Dialect,
    config: &ConnectionConfig,
    connection_string: String,
) -> Result<Arc<dyn Connection>> {
    if config.dialect != dialect {
        return Err(EngineError::Configuration(format!(
            "{} adapter cannot open a {} connection",
            dialect, config.dialect
        )));
    }
    let connector = connector.ok_or_else(|| {
        EngineError::NotSupported(format!(
            "no {} connector registered; attach one with `with_connector`",
            dialect
        ))
    })?;
    tracing::info!(dialect = %dialect, connection = %config.name, "opening connection through connector");
    let connection = connector.connect(config, &connection_string).await?;
    tracing::debug!(connection_id = %connection.id(), "connector returned connection");
    Ok(connection)
}

/// Render `key=value` pairs from extra parameters in a stable order
pub(crate) fn sorted_params(config: &ConnectionConfig) -> Vec<(&str, &str)> {
    let mut params: Vec<_> = config
        .params
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    params.sort();
    params
}

/// Quote an ODBC attribute value when it contains separators
pub(crate) fn odbc_value(value: &str) -> String {
    if value.contains([';', '{', '}']) || value.starts_with(' ') || value.ends_with(' ') {
        format!("{{{}}}", value.replace('}', "}}"))
    } else {
        value.to_string()
    }
}

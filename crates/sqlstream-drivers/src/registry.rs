//! Registry of backend adapters, keyed by dialect

use std::collections::HashMap;
use std::sync::Arc;

use sqlstream_core::{BackendAdapter, ConnectionConfig, Dialect, EngineError, Result};

use crate::{AccessAdapter, MySqlAdapter, PostgresAdapter, SqlServerAdapter, SqliteAdapter};

pub struct AdapterRegistry {
    adapters: HashMap<Dialect, Arc<dyn BackendAdapter>>,
}

impl AdapterRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Create a registry with an adapter for every dialect
    ///
    /// Only SQLite can open connections out of the box; the other adapters
    /// need a `Connector` and can be replaced with `register`.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(SqliteAdapter::new()));
        registry.register(Arc::new(SqlServerAdapter::new()));
        registry.register(Arc::new(PostgresAdapter::new()));
        registry.register(Arc::new(MySqlAdapter::new()));
        registry.register(Arc::new(AccessAdapter::new()));
        registry
    }

    /// Register an adapter, replacing any previous one for its dialect
    pub fn register(&mut self, adapter: Arc<dyn BackendAdapter>) {
        let dialect = adapter.dialect();
        tracing::info!(dialect = %dialect, "registering backend adapter");
        self.adapters.insert(dialect, adapter);
    }

    pub fn get(&self, dialect: Dialect) -> Option<Arc<dyn BackendAdapter>> {
        let adapter = self.adapters.get(&dialect).cloned();
        if adapter.is_none() {
            tracing::warn!(dialect = %dialect, "adapter not found in registry");
        }
        adapter
    }

    /// Adapter for a connection definition
    pub fn for_config(&self, config: &ConnectionConfig) -> Result<Arc<dyn BackendAdapter>> {
        self.get(config.dialect).ok_or_else(|| {
            EngineError::NotSupported(format!("no adapter registered for {}", config.dialect))
        })
    }

    pub fn has(&self, dialect: Dialect) -> bool {
        self.adapters.contains_key(&dialect)
    }

    pub fn list(&self) -> Vec<Dialect> {
        let mut dialects: Vec<_> = self.adapters.keys().copied().collect();
        dialects.sort_by_key(|d| d.id());
        dialects
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_cover_every_dialect() {
        let registry = AdapterRegistry::with_defaults();
        for dialect in Dialect::ALL {
            assert!(registry.has(dialect), "missing {dialect}");
            assert_eq!(registry.get(dialect).unwrap().dialect(), dialect);
        }
    }

    #[test]
    fn test_for_config_on_empty_registry() {
        let registry = AdapterRegistry::new();
        let config = ConnectionConfig::new_sqlite(":memory:");
        assert!(matches!(
            registry.for_config(&config),
            Err(EngineError::NotSupported(_))
        ));
    }
}

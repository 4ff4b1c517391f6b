use std::sync::Arc;

use parking_lot::Mutex;
use sqlstream_core::{BackendAdapter, ConnectionId, EngineError, ErrorClass, Result};

use crate::factory::ConnectionFactory;
use crate::pool::ConnectionPool;
use crate::slot::{ConnectionSlot, WeakConnectionSlot};

/// Outcome of a successful reconnect
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectReport {
    pub old_id: ConnectionId,
    pub new_id: ConnectionId,
    /// Registered slots that now use the new connection
    pub contexts_updated: usize,
}

/// Replaces lost connections in every execution context that depends on them
pub struct ReconnectionManager {
    factory: Arc<dyn ConnectionFactory>,
    adapter: Arc<dyn BackendAdapter>,
    slots: Mutex<Vec<WeakConnectionSlot>>,
}

impl ReconnectionManager {
    pub fn new(factory: Arc<dyn ConnectionFactory>, adapter: Arc<dyn BackendAdapter>) -> Self {
        Self {
            factory,
            adapter,
            slots: Mutex::new(Vec::new()),
        }
    }

    /// Manager that opens connections exactly the way `pool` does
    pub fn for_pool(pool: &ConnectionPool, adapter: Arc<dyn BackendAdapter>) -> Self {
        Self::new(pool.factory(), adapter)
    }

    pub fn classify(&self, error: &EngineError) -> ErrorClass {
        self.adapter.classify_error(error)
    }

    pub fn is_connection_loss(&self, error: &EngineError) -> bool {
        self.classify(error).is_connection_loss()
    }

    /// Track a slot; the manager holds it weakly
    pub fn register(&self, slot: &ConnectionSlot) {
        let mut slots = self.slots.lock();
        slots.retain(WeakConnectionSlot::is_alive);
        slots.push(slot.downgrade());
    }

    /// Number of live registered slots
    pub fn registered(&self) -> usize {
        let mut slots = self.slots.lock();
        slots.retain(WeakConnectionSlot::is_alive);
        slots.len()
    }

    /// Open a replacement for `old_id` and install it in every registered
    /// slot that still uses `old_id`
    #[tracing::instrument(skip(self), fields(old_id = %old_id))]
    pub async fn reconnect(&self, old_id: ConnectionId) -> Result<ReconnectReport> {
        let targets: Vec<ConnectionSlot> = {
            let mut slots = self.slots.lock();
            slots.retain(WeakConnectionSlot::is_alive);
            slots
                .iter()
                .filter_map(WeakConnectionSlot::upgrade)
                .filter(|slot| slot.id() == old_id)
                .collect()
        };
        if targets.is_empty() {
            return Err(EngineError::InvalidState(format!(
                "no execution context uses connection {}",
                old_id
            )));
        }

        let replacement = match self.factory.create().await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(error = %e, "reconnect failed");
                return Err(e);
            }
        };
        let new_id = replacement.id();

        let mut old = None;
        for slot in &targets {
            old = Some(slot.replace(replacement.clone()));
        }
        if let Some(old) = old {
            if let Err(e) = old.close().await {
                tracing::debug!(error = %e, "closing lost connection failed");
            }
        }

        tracing::info!(new_id = %new_id, contexts = targets.len(), "reconnected");
        Ok(ReconnectReport {
            old_id,
            new_id,
            contexts_updated: targets.len(),
        })
    }
}

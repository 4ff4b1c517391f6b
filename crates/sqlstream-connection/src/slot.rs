//! Swappable connection references

use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use sqlstream_core::{Connection, ConnectionId};

/// The connection an execution context currently works on
///
/// Clones share the same slot, so a replacement is seen by every holder.
#[derive(Clone)]
pub struct ConnectionSlot {
    inner: Arc<RwLock<Arc<dyn Connection>>>,
}

impl ConnectionSlot {
    pub fn new(connection: Arc<dyn Connection>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(connection)),
        }
    }

    pub fn get(&self) -> Arc<dyn Connection> {
        self.inner.read().clone()
    }

    pub fn id(&self) -> ConnectionId {
        self.inner.read().id()
    }

    /// Install `connection`, returning the one it replaced
    pub fn replace(&self, connection: Arc<dyn Connection>) -> Arc<dyn Connection> {
        std::mem::replace(&mut *self.inner.write(), connection)
    }

    pub fn downgrade(&self) -> WeakConnectionSlot {
        WeakConnectionSlot {
            inner: Arc::downgrade(&self.inner),
        }
    }
}

/// A slot reference that does not keep its execution context alive
#[derive(Clone)]
pub struct WeakConnectionSlot {
    inner: Weak<RwLock<Arc<dyn Connection>>>,
}

impl WeakConnectionSlot {
    pub fn upgrade(&self) -> Option<ConnectionSlot> {
        self.inner.upgrade().map(|inner| ConnectionSlot { inner })
    }

    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use crate::stream::StreamHandle;

/// Cancels the running batch from any task.
///
/// Cancelling stops every stream the batch opened and prevents further
/// statements from starting; a statement already executing on the backend
/// runs to completion.
#[derive(Clone, Default)]
pub struct CancelHandle {
    inner: Arc<CancelState>,
}

#[derive(Default)]
struct CancelState {
    cancelled: AtomicBool,
    streams: Mutex<Vec<StreamHandle>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        let streams = self.inner.streams.lock();
        for stream in streams.iter() {
            stream.stop();
        }
        tracing::info!(streams = streams.len(), "batch cancelled");
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Forget the previous batch
    pub(crate) fn reset(&self) {
        self.inner.cancelled.store(false, Ordering::SeqCst);
        self.inner.streams.lock().clear();
    }

    pub(crate) fn track(&self, stream: StreamHandle) {
        if self.is_cancelled() {
            stream.stop();
        }
        self.inner.streams.lock().push(stream);
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

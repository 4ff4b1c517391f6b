//! Pool statistics

use serde::{Deserialize, Serialize};

/// Snapshot of a pool's bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PoolStats {
    /// Connections created and not yet discarded
    pub created: usize,
    /// Connections sitting in the pool
    pub idle: usize,
    /// Connections checked out to callers
    pub checked_out: usize,
    /// Callers blocked in `acquire`
    pub waiting: usize,
    pub max_size: usize,
}

impl PoolStats {
    /// Fraction of the pool's capacity that is checked out (0.0 to 1.0)
    pub fn utilization(&self) -> f64 {
        if self.max_size == 0 {
            0.0
        } else {
            self.checked_out as f64 / self.max_size as f64
        }
    }

    /// Every connection exists and none is idle; `acquire` would block
    pub fn is_exhausted(&self) -> bool {
        self.created >= self.max_size && self.idle == 0
    }
}

//! Confirmation for large result sets

use async_trait::async_trait;

use crate::splitter::Statement;

/// Asked before a stream whose estimate exceeds the configured threshold
/// starts fetching. Declining leaves the stream idle; it can still be
/// resumed or paged with `load_more` later.
#[async_trait]
pub trait LargeResultGate: Send + Sync {
    async fn confirm(&self, statement: &Statement, estimated_rows: u64) -> bool;
}

/// A preset answer, e.g. from a command-line flag
pub struct FixedAnswer(pub bool);

#[async_trait]
impl LargeResultGate for FixedAnswer {
    async fn confirm(&self, statement: &Statement, estimated_rows: u64) -> bool {
        if !self.0 {
            tracing::info!(
                line = statement.line_start,
                estimated_rows,
                "large result set not confirmed"
            );
        }
        self.0
    }
}

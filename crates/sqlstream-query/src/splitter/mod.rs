//! Statement splitting
//!
//! Turns a script into executable statements with 1-based line ranges.
//! T-SQL scripts are first cut into batches at `GO` lines; every dialect is
//! then split at top-level semicolons using the dialect-aware lexer, so
//! separators inside literals, quoted identifiers, comments and routine
//! bodies are left alone.

mod split;
#[cfg(test)]
mod tests;

pub use split::{Batch, Statement, is_select_statement, split_batches, split_statements};

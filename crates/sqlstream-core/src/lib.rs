//! sqlstream core - shared abstractions for the execution engine
//!
//! This crate holds everything the other sqlstream crates agree on:
//!
//! - `Connection` / `Cursor` - the driver-layer contract
//! - `BackendAdapter` - per-backend connection construction, count wrapping
//!   and error classification
//! - `EngineError` - the engine's error taxonomy
//! - `EngineConfig` - tunables loaded from TOML
//! - `lexer` - a dialect-aware SQL token scanner
//! - Common types like `Value`, `Row` and `ColumnMeta`

mod adapter;
mod config;
mod dialect;
mod driver;
mod error;
pub mod lexer;
mod types;

pub use adapter::*;
pub use config::*;
pub use dialect::*;
pub use driver::*;
pub use error::*;
pub use types::*;

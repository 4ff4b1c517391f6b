//! Error types for sqlstream

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// A failure reported by a backend driver
///
/// `code` carries the SQLSTATE or vendor error code when the driver
/// exposes one, which lets classification avoid string matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverError {
    pub message: String,
    pub code: Option<String>,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            code: Some(code.into()),
        }
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "[{}] {}", code, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Core error type for engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Connection error: {0}")]
    Connection(String),

    /// The backend connection is gone; the caller may offer a reconnect
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// A statement was rejected by the backend; the batch halts here
    #[error(
        "Statement {ordinal} (lines {line_start}-{line_end}) failed: {source}",
        ordinal = .index + 1
    )]
    Statement {
        index: usize,
        line_start: usize,
        line_end: usize,
        source: Box<EngineError>,
    },

    #[error("Timed out waiting for a pooled connection (timeout: {timeout:?})")]
    PoolExhausted { timeout: Duration },

    #[error("Driver error: {0}")]
    Driver(DriverError),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cancelled")]
    Cancelled,
}

impl EngineError {
    /// Driver error without a structured code
    pub fn driver(message: impl Into<String>) -> Self {
        EngineError::Driver(DriverError::new(message))
    }

    /// Driver error carrying a SQLSTATE or vendor code
    pub fn driver_with_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        EngineError::Driver(DriverError::with_code(code, message))
    }

    /// Attach a statement position to an error raised while running it
    pub fn at_statement(self, index: usize, line_start: usize, line_end: usize) -> Self {
        EngineError::Statement {
            index,
            line_start,
            line_end,
            source: Box::new(self),
        }
    }

    /// The underlying error with any statement context peeled off
    pub fn root(&self) -> &EngineError {
        match self {
            EngineError::Statement { source, .. } => source.root(),
            other => other,
        }
    }

    /// Structured SQLSTATE / vendor code, if the driver supplied one
    pub fn code(&self) -> Option<&str> {
        match self.root() {
            EngineError::Driver(err) => err.code.as_deref(),
            _ => None,
        }
    }

    /// Source line range for statement-level failures
    pub fn line_range(&self) -> Option<(usize, usize)> {
        match self {
            EngineError::Statement {
                line_start,
                line_end,
                ..
            } => Some((*line_start, *line_end)),
            _ => None,
        }
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

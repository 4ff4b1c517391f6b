//! Connection-loss classification
//!
//! Drivers report lost connections in many shapes. Structured codes are
//! checked first (SQLSTATE class `08`, ODBC timeouts `HYT00`/`HYT01`, and
//! backend vendor codes); when no code matches, the stringified error is
//! searched for known markers.

use sqlstream_core::{EngineError, ErrorClass};

/// Markers that mean the connection is gone on every backend
pub const CONNECTION_LOSS_MARKERS: &[&str] = &[
    "communication link failure",
    "connection timed out",
    "connection refused",
    "08001",
    "08s01",
    "hyt00",
    "hyt01",
];

/// Backend-specific additions to the shared marker table
#[derive(Debug, Clone, Copy, Default)]
pub struct BackendMarkers {
    /// Lowercase substrings of the error message
    pub messages: &'static [&'static str],
    /// Vendor error codes, compared case-insensitively
    pub codes: &'static [&'static str],
}

impl BackendMarkers {
    pub const NONE: BackendMarkers = BackendMarkers {
        messages: &[],
        codes: &[],
    };
}

/// Whether a SQLSTATE code signals a connection exception or ODBC timeout
pub fn is_connection_loss_state(code: &str) -> bool {
    let code = code.trim();
    (code.len() == 5 && code.starts_with("08"))
        || code.eq_ignore_ascii_case("HYT00")
        || code.eq_ignore_ascii_case("HYT01")
}

pub fn classify(error: &EngineError, backend: &BackendMarkers) -> ErrorClass {
    if matches!(error.root(), EngineError::ConnectionLost(_)) {
        return ErrorClass::ConnectionLoss;
    }

    if let Some(code) = error.code() {
        if is_connection_loss_state(code)
            || backend.codes.iter().any(|c| c.eq_ignore_ascii_case(code))
        {
            return ErrorClass::ConnectionLoss;
        }
    }

    let text = error.to_string().to_lowercase();
    let matched = CONNECTION_LOSS_MARKERS
        .iter()
        .chain(backend.messages)
        .find(|marker| text.contains(*marker));
    match matched {
        Some(marker) => {
            tracing::debug!(marker = %marker, "error classified as connection loss");
            ErrorClass::ConnectionLoss
        }
        None => ErrorClass::Execution,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_08s01_in_message_is_connection_loss() {
        let err = EngineError::driver("[Microsoft][ODBC Driver 17] 08S01 TCP Provider: error");
        assert_eq!(
            classify(&err, &BackendMarkers::NONE),
            ErrorClass::ConnectionLoss
        );
    }

    #[test]
    fn test_syntax_error_is_execution_failure() {
        let err = EngineError::driver("syntax error near SELECT");
        assert_eq!(classify(&err, &BackendMarkers::NONE), ErrorClass::Execution);
    }

    #[test]
    fn test_structured_sqlstate_wins_over_message() {
        let err = EngineError::driver_with_code("08006", "could not receive data");
        assert_eq!(
            classify(&err, &BackendMarkers::NONE),
            ErrorClass::ConnectionLoss
        );

        let err = EngineError::driver_with_code("42601", "connection refused is not a column");
        // Message markers still apply when the code itself is unrelated
        assert_eq!(
            classify(&err, &BackendMarkers::NONE),
            ErrorClass::ConnectionLoss
        );
    }

    #[test]
    fn test_backend_markers_extend_the_table() {
        const MYSQL: BackendMarkers = BackendMarkers {
            messages: &["server has gone away"],
            codes: &["2013"],
        };
        let gone = EngineError::driver("MySQL server has gone away");
        assert_eq!(classify(&gone, &MYSQL), ErrorClass::ConnectionLoss);
        assert_eq!(classify(&gone, &BackendMarkers::NONE), ErrorClass::Execution);

        let lost = EngineError::driver_with_code("2013", "Lost connection during query");
        assert_eq!(classify(&lost, &MYSQL), ErrorClass::ConnectionLoss);
    }

    #[test]
    fn test_statement_context_does_not_hide_loss() {
        let err = EngineError::ConnectionLost("worker stopped".into()).at_statement(1, 3, 3);
        assert_eq!(
            classify(&err, &BackendMarkers::NONE),
            ErrorClass::ConnectionLoss
        );
    }

    #[test]
    fn test_odbc_timeout_states() {
        assert!(is_connection_loss_state("HYT00"));
        assert!(is_connection_loss_state("hyt01"));
        assert!(is_connection_loss_state("08001"));
        assert!(!is_connection_loss_state("42000"));
        assert!(!is_connection_loss_state("080"));
    }
}

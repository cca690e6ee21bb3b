//! Error types for Scribe Core.
//!
//! The taxonomy separates transport-level failures (recovered inside the sync
//! layer by falling back to the local store) from application rejections and
//! local-store inconsistencies (which propagate to the caller).

use thiserror::Error;

/// Result type alias for Scribe operations
pub type ScribeResult<T> = Result<T, ScribeError>;

/// Main error type for Scribe operations
#[derive(Error, Debug)]
pub enum ScribeError {
    /// Transport-level failure: no response from the remote API.
    /// Recovered inside the sync layer, never surfaced as a user-facing error.
    #[error("Remote API unreachable: {0}")]
    Unreachable(String),

    /// The remote API answered and refused the request (404, 400, ...).
    /// Always propagates; applying it locally would diverge from server truth.
    #[error("Remote API rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// The remote API answered 2xx but the body did not match the contract.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A local mutation targeted an id absent from the local store.
    #[error("Local store inconsistency: {0}")]
    Inconsistent(String),

    #[error("Validation error in {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Local store error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("{0}")]
    Other(String),
}

impl ScribeError {
    /// Create a new validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        ScribeError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Create a new unreachable error
    pub fn unreachable(message: impl Into<String>) -> Self {
        ScribeError::Unreachable(message.into())
    }

    /// Create a new rejected error
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        ScribeError::Rejected {
            status,
            message: message.into(),
        }
    }

    /// Create a new inconsistency error
    pub fn inconsistent(message: impl Into<String>) -> Self {
        ScribeError::Inconsistent(message.into())
    }

    /// Whether this is a network-class error. Only these trigger the
    /// local-store fallback; everything else propagates to the caller.
    pub fn is_network(&self) -> bool {
        matches!(self, ScribeError::Unreachable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_class_is_only_unreachable() {
        assert!(ScribeError::unreachable("connection refused").is_network());
        assert!(!ScribeError::rejected(404, "no such note").is_network());
        assert!(!ScribeError::inconsistent("note 9 missing").is_network());
        assert!(!ScribeError::Protocol("bad body".to_string()).is_network());
    }

    #[test]
    fn test_rejected_display_carries_status() {
        let err = ScribeError::rejected(404, "note not found");
        assert_eq!(
            err.to_string(),
            "Remote API rejected request (404): note not found"
        );
    }

    #[test]
    fn test_validation_error() {
        let err = ScribeError::validation("color", "must be a #RRGGBB hex color");
        assert!(matches!(err, ScribeError::Validation { .. }));
    }
}

//! Error Types
//!
//! Every fallible operation in the crate returns [`ShortnError`]. The variants
//! mirror the failure classes callers have to tell apart:
//!
//! | Variant          | Raised by                                   | Retried? |
//! |------------------|---------------------------------------------|----------|
//! | `Configuration`  | generator construction, config validation   | never    |
//! | `Validation`     | encoder (negative id), empty url / code     | never    |
//! | `NotFound`       | store `get` / `delete` on an absent key     | never    |
//! | `TransientIo`    | store or channel transport failures         | only by the consumer's `retry-N` policy |
//! | `Serialization`  | malformed replication payloads              | never    |
//! | `Publish`        | the event channel refused an event          | never    |

use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, ShortnError>;

/// Errors produced by the issuance and resolution pipeline.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ShortnError {
    /// Startup-time failure: bad epoch, bad node id, unusable clock.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The caller supplied unusable input.
    #[error("validation error: {0}")]
    Validation(String),

    /// The key is absent (never written, not yet replicated, deleted or expired).
    #[error("not found: {0}")]
    NotFound(String),

    /// A store or channel call failed.
    #[error("transient I/O error: {0}")]
    TransientIo(String),

    /// A replication payload could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The event channel did not accept the event.
    #[error("publish error: {0}")]
    Publish(String),
}

impl ShortnError {
    /// Returns true for the "key absent" condition.
    pub fn is_not_found(&self) -> bool {
        matches!(self, ShortnError::NotFound(_))
    }

    /// Only transport failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ShortnError::TransientIo(_))
    }
}

impl From<serde_json::Error> for ShortnError {
    fn from(err: serde_json::Error) -> Self {
        ShortnError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(ShortnError::NotFound("abc".into()).is_not_found());
        assert!(!ShortnError::Validation("abc".into()).is_not_found());

        assert!(ShortnError::TransientIo("reset".into()).is_retryable());
        assert!(!ShortnError::Serialization("eof".into()).is_retryable());
        assert!(!ShortnError::Publish("closed".into()).is_retryable());
    }

    #[test]
    fn test_json_error_maps_to_serialization() {
        let err = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: ShortnError = err.into();
        assert!(matches!(err, ShortnError::Serialization(_)));
    }

    #[test]
    fn test_display() {
        let err = ShortnError::NotFound("1EfYlH2c4IQ".into());
        assert_eq!(err.to_string(), "not found: 1EfYlH2c4IQ");
    }
}

//! Error types for the Solace sync core.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A shared error type for the entire sync core.
///
/// This provides typed, structured error variants with automatic conversion
/// from common error types via the `From` trait. The taxonomy matters for
/// control flow: network-classified errors are retried and queued, validation
/// errors fail fast, and storage errors abort the calling operation.
#[derive(Error, Debug, Clone, Serialize, Deserialize)]
pub enum SolaceError {
    /// Network-classified error (timeout, connection failure, 5xx).
    /// Eligible for retry with backoff and offline queueing.
    #[error("Network error: {message}")]
    Network { message: String },

    /// The session token was rejected by the backend (401 outside login/signup).
    #[error("Authentication expired, please log in again")]
    AuthExpired,

    /// Credential rejection or other authentication failure.
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Client-side rejection by the backend (4xx other than 401).
    /// Never retried or queued.
    #[error("Validation error ({status}): {message}")]
    Validation { status: u16, message: String },

    /// Durable-store read/write failure. Fatal to the calling operation.
    #[error("Storage error: {message}")]
    Storage { message: String },

    /// Entity not found error with type information
    #[error("Entity not found: {entity_type} '{id}'")]
    NotFound {
        entity_type: &'static str,
        id: String,
    },

    /// Serialization/deserialization error
    #[error("Serialization error: {format} - {message}")]
    Serialization { format: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SolaceError {
    // ============================================================================
    // Constructor helpers
    // ============================================================================

    /// Creates a Network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Creates a Storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates an Auth error
    pub fn auth(message: impl Into<String>) -> Self {
        Self::Auth(message.into())
    }

    /// Creates a Validation error
    pub fn validation(status: u16, message: impl Into<String>) -> Self {
        Self::Validation {
            status,
            message: message.into(),
        }
    }

    /// Creates a NotFound error
    pub fn not_found(entity_type: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type,
            id: id.into(),
        }
    }

    /// Creates a Config error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Creates an Internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    // ============================================================================
    // Type checking methods
    // ============================================================================

    /// Check if this error is network-classified (retryable / queueable)
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network { .. })
    }

    /// Check if this is an AuthExpired error
    pub fn is_auth_expired(&self) -> bool {
        matches!(self, Self::AuthExpired)
    }

    /// Check if this is a Validation error
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    /// Check if this is a Storage error
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage { .. })
    }

    /// Check if this is a NotFound error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

// ============================================================================
// From implementations for automatic conversion
// ============================================================================

impl From<std::io::Error> for SolaceError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage {
            message: format!("{} (kind: {:?})", err, err.kind()),
        }
    }
}

impl From<serde_json::Error> for SolaceError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            format: "JSON".to_string(),
            message: err.to_string(),
        }
    }
}

/// A type alias for `Result<T, SolaceError>`.
pub type Result<T> = std::result::Result<T, SolaceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_classification() {
        let err = SolaceError::network("connection refused");
        assert!(err.is_network());
        assert!(!err.is_validation());
    }

    #[test]
    fn test_validation_fails_fast() {
        let err = SolaceError::validation(422, "intensity out of range");
        assert!(err.is_validation());
        assert!(!err.is_network());
    }

    #[test]
    fn test_io_error_maps_to_storage() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: SolaceError = io.into();
        assert!(err.is_storage());
    }

    #[test]
    fn test_serde_error_maps_to_serialization() {
        let bad = serde_json::from_str::<serde_json::Value>("{not json");
        let err: SolaceError = bad.unwrap_err().into();
        assert!(matches!(err, SolaceError::Serialization { .. }));
    }
}

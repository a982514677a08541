//! # Error Types
//!
//! Domain-specific error types for haven-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  haven-core errors (this file)                                         │
//! │  ├── CoreError        - Parsing / domain errors                        │
//! │  └── ValidationError  - Malformed cloud payloads                       │
//! │                                                                         │
//! │  haven-db errors (separate crate)                                      │
//! │  └── DbError          - Local cache failures                           │
//! │                                                                         │
//! │  haven-sync errors (separate crate)                                    │
//! │  └── SyncError        - Network, breaker and sync failures             │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError → scheduler log         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

// =============================================================================
// Core Error
// =============================================================================

/// Core domain errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A tier name did not match any known connectivity tier.
    #[error("Unknown connectivity tier: '{0}'. Valid options: green, yellow, orange, red")]
    UnknownTier(String),

    /// A change action did not match create/update/delete.
    #[error("Unknown change action: '{0}'")]
    UnknownAction(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Payload validation errors.
///
/// Raised when a cloud response does not have the shape the sync engine
/// needs. Unknown *keys* are never a validation error; only known keys with
/// the wrong shape are.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing.
    ///
    /// ## When This Occurs
    /// - Full-sync response without `version`
    /// - Delta / push payload without `version` or `changes`
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    /// A field is present but has the wrong JSON type.
    #[error("Field '{field}' must be {expected}")]
    WrongType { field: String, expected: String },

    /// The payload itself is not a JSON object.
    #[error("Expected a JSON object for {context}")]
    NotAnObject { context: String },

    /// A version number was negative.
    #[error("Version must be non-negative, got {0}")]
    NegativeVersion(i64),

    /// A change inside a batch is malformed.
    #[error("Change #{index} is invalid: {reason}")]
    InvalidChange { index: usize, reason: String },
}

impl ValidationError {
    /// Creates a MissingField error.
    pub fn missing(field: impl Into<String>) -> Self {
        ValidationError::MissingField {
            field: field.into(),
        }
    }

    /// Creates a WrongType error.
    pub fn wrong_type(field: impl Into<String>, expected: impl Into<String>) -> Self {
        ValidationError::WrongType {
            field: field.into(),
            expected: expected.into(),
        }
    }
}

/// Result type for haven-core operations.
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_wraps_into_core_error() {
        let err: CoreError = ValidationError::missing("version").into();
        assert!(err.to_string().contains("version"));
    }

    #[test]
    fn test_unknown_tier_message_lists_options() {
        let err = CoreError::UnknownTier("purple".into());
        assert!(err.to_string().contains("purple"));
        assert!(err.to_string().contains("green"));
    }
}

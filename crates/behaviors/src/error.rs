//! Error types for the behavior extensions
//!
//! Every failure raised by a listener propagates synchronously up through the
//! flush call. Configuration errors surface when a class's extension metadata
//! is built, everything else surfaces during flush.

use thiserror::Error;

/// Result type alias for behavior operations
pub type BehaviorResult<T> = Result<T, BehaviorError>;

/// Error types for behavior extensions
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BehaviorError {
    /// Invalid or contradictory mapping configuration for a class
    #[error("Configuration error in '{class}': {message}")]
    Configuration { class: String, message: String },

    /// A materialized path tree is locked by another writer
    #[error("Tree with root '{root}' is locked: {message}")]
    Locking { root: String, message: String },

    /// No free numeric suffix could be found for a slug
    #[error("Unable to find a unique slug for '{candidate}' in '{class}'")]
    UniquenessExhausted { class: String, candidate: String },

    /// The active adapter cannot perform the requested operation
    #[error("Operation '{operation}' is not supported by the {backend} adapter")]
    UnsupportedOperation { operation: String, backend: String },

    /// A structural tree change would break the tree invariants
    #[error("Invalid tree operation: {0}")]
    InvalidTree(String),

    /// A field is not present on an object or class
    #[error("Field '{field}' not found on '{class}'")]
    FieldNotFound { class: String, field: String },

    /// A field holds a value the behavior cannot work with
    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },

    /// A referenced object or class is unknown to the object manager
    #[error("Object not found: {0}")]
    ObjectNotFound(String),

    /// Configuration payload could not be decoded
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error reported by the persistence backend
    #[error("Backend error: {0}")]
    Backend(String),
}

impl BehaviorError {
    pub fn configuration(class: &str, message: impl Into<String>) -> Self {
        Self::Configuration {
            class: class.to_string(),
            message: message.into(),
        }
    }

    pub fn locking(root: impl ToString, message: impl Into<String>) -> Self {
        Self::Locking {
            root: root.to_string(),
            message: message.into(),
        }
    }

    pub fn unsupported(operation: &str, backend: impl ToString) -> Self {
        Self::UnsupportedOperation {
            operation: operation.to_string(),
            backend: backend.to_string(),
        }
    }

    pub fn invalid_tree(message: impl Into<String>) -> Self {
        Self::InvalidTree(message.into())
    }

    pub fn field_not_found(class: &str, field: &str) -> Self {
        Self::FieldNotFound {
            class: class.to_string(),
            field: field.to_string(),
        }
    }

    pub fn invalid_value(field: &str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// Locking errors are the only ones a caller may retry after a backoff
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Locking { .. })
    }
}

impl From<serde_json::Error> for BehaviorError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configuration_error_display() {
        let error = BehaviorError::configuration("Article", "slug field 'slug' does not exist");
        let message = format!("{}", error);
        assert!(message.contains("Article"));
        assert!(message.contains("slug field 'slug' does not exist"));
    }

    #[test]
    fn test_locking_error_is_retryable() {
        let error = BehaviorError::locking(7, "lock acquired 1s ago");
        assert!(error.is_retryable());
        assert!(!BehaviorError::invalid_tree("cycle").is_retryable());
    }

    #[test]
    fn test_unsupported_operation_display() {
        let error = BehaviorError::unsupported("nested set", "document");
        assert_eq!(
            error.to_string(),
            "Operation 'nested set' is not supported by the document adapter"
        );
    }

    #[test]
    fn test_conversion_from_serde_json_error() {
        let json_error = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let error: BehaviorError = json_error.into();

        match error {
            BehaviorError::Serialization(message) => assert!(!message.is_empty()),
            _ => panic!("Expected serialization error"),
        }
    }
}

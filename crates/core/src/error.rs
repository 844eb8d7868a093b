//! Error types for the record model

use std::fmt;
use thiserror::Error;

/// Result type for core operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Error severity classification
///
/// Used by the higher layers to decide whether an operation is worth retrying
/// on the next sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    /// Error can be recovered from by retrying later
    Recoverable,
    /// The affected item is dropped but everything else continues
    Degraded,
    /// Requires configuration or user intervention
    Fatal,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recoverable => write!(f, "Recoverable"),
            Self::Degraded => write!(f, "Degraded"),
            Self::Fatal => write!(f, "Fatal"),
        }
    }
}

/// Errors raised while constructing or parsing model values
#[derive(Debug, Error)]
pub enum CoreError {
    /// A local identity string was not a valid UUID
    #[error("Invalid local identity '{value}': {source}")]
    InvalidLocalId {
        value: String,
        #[source]
        source: uuid::Error,
    },

    /// A server identity was empty
    #[error("Server identity must not be empty")]
    EmptyServerId,

    /// A collection key was empty
    #[error("Collection key must not be empty")]
    EmptyCollectionKey,

    /// A record payload was not a JSON object
    #[error("Record payload must be a JSON object, got {kind}")]
    NotAnObject { kind: &'static str },
}

impl CoreError {
    /// Returns the severity level of this error
    pub fn severity(&self) -> ErrorSeverity {
        ErrorSeverity::Fatal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CoreError::EmptyServerId;
        assert!(err.to_string().contains("must not be empty"));
    }

    #[test]
    fn test_not_an_object_display() {
        let err = CoreError::NotAnObject { kind: "array" };
        assert_eq!(err.to_string(), "Record payload must be a JSON object, got array");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(ErrorSeverity::Recoverable < ErrorSeverity::Degraded);
        assert!(ErrorSeverity::Degraded < ErrorSeverity::Fatal);
        assert_eq!(ErrorSeverity::Fatal.to_string(), "Fatal");
    }
}

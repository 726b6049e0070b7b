//! Error types and result aliases for quarry.
//!
//! Errors are structured for programmatic handling. Storage-facing code maps
//! backend failures into [`Error::Storage`] and keeps "not found" distinct so
//! callers can treat a missing object as a normal outcome.

use std::fmt;

/// The result type used throughout quarry.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in quarry core operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An invalid identifier was provided.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of what made the ID invalid.
        message: String,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A path or object was not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The operation observed a cancellation request.
    #[error("operation cancelled: {operation}")]
    Cancelled {
        /// The operation that was interrupted.
        operation: String,
    },
}

impl Error {
    /// Creates a new storage error with the given message.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new storage error with a source cause.
    #[must_use]
    pub fn storage_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a cancellation error for the named operation.
    #[must_use]
    pub fn cancelled(operation: impl fmt::Display) -> Self {
        Self::Cancelled {
            operation: operation.to_string(),
        }
    }

    /// Returns true if this error is a missing-object result.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(err: &Error) -> &'static str {
        match err {
            Error::InvalidId { .. } => "invalid_id",
            Error::Storage { .. } => "storage",
            Error::NotFound(_) => "not_found",
            Error::InvalidInput(_) => "invalid_input",
            Error::Cancelled { .. } => "cancelled",
        }
    }

    #[test]
    fn helpers_build_the_expected_variants() {
        let io = std::io::Error::other("disk full");
        let cases = [
            (Error::storage("lock poisoned"), "storage"),
            (Error::storage_with_source("write a", io), "storage"),
            (Error::cancelled("artifact write"), "cancelled"),
            (Error::NotFound("a".into()), "not_found"),
        ];
        for (err, expected) in &cases {
            assert_eq!(label(err), *expected, "{err}");
            assert_eq!(err.is_not_found(), *expected == "not_found");
        }
        assert_eq!(
            Error::cancelled("artifact write").to_string(),
            "operation cancelled: artifact write"
        );
        assert!(std::error::Error::source(&cases[1].0).is_some());
    }
}

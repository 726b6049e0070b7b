//! Error types for named-query resolution and projection builds.
//!
//! Every error reports an [`ErrorClass`] so that an outer surface (HTTP, CLI)
//! can map it to a client-input, not-found or server response without
//! inspecting variants.

use quarry_core::BuildId;
use thiserror::Error;

/// Result type alias for named-query operations.
pub type Result<T> = std::result::Result<T, NamedQueryError>;

/// Coarse classification used to pick a response for an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The request was malformed; never retried, never cached.
    ClientInput,
    /// The customer or named query does not exist.
    NotFound,
    /// Generation or storage failed; retryable by a later request.
    Server,
}

/// A template could not be applied to the request arguments.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TemplateError {
    /// The stored template is empty.
    #[error("named query template is empty")]
    EmptyTemplate,

    /// A positional placeholder refers past the supplied arguments.
    #[error("not enough query arguments: placeholder {index} was not supplied")]
    MissingPositional {
        /// 1-based argument index.
        index: usize,
    },

    /// A keyed placeholder has no matching request argument.
    #[error("missing query argument '{name}'")]
    MissingKeyed {
        /// Placeholder name.
        name: String,
    },

    /// A template element could not be interpreted as a parameter reference.
    #[error("could not parse template element parameter '{element}'")]
    InvalidParameter {
        /// The offending element.
        element: String,
    },

    /// A numeric key received a non-numeric value.
    #[error("value '{value}' for '{key}' is not a valid number")]
    InvalidNumber {
        /// Template key.
        key: String,
        /// Resolved value.
        value: String,
    },

    /// A date key received an unparseable value.
    #[error("value '{value}' for '{key}' is not a valid date")]
    InvalidDate {
        /// Template key.
        key: String,
        /// Resolved value.
        value: String,
    },

    /// A `{name:FMT}` placeholder used an unknown format.
    #[error("unknown placeholder format '{format}'")]
    UnknownFormat {
        /// The format name.
        format: String,
    },

    /// A query name is empty or not path-safe.
    #[error("invalid named query name '{name}'")]
    InvalidQueryName {
        /// The rejected name.
        name: String,
    },
}

/// Errors that can occur while resolving or building a projection.
#[derive(Debug, Error)]
pub enum NamedQueryError {
    /// The template could not be applied to the request.
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// A customer or named query was not found.
    #[error("{resource_type} not found: {id}")]
    NotFound {
        /// Kind of resource that was looked up.
        resource_type: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// The asset catalog failed.
    #[error("catalog error: {message}")]
    Catalog {
        /// Description of the failure.
        message: String,
    },

    /// A generator failed to produce an artifact.
    #[error("generation error: {message}")]
    Generation {
        /// Description of the failure.
        message: String,
    },

    /// Object storage failed.
    #[error("storage error: {0}")]
    Storage(#[source] quarry_core::Error),

    /// The caller cancelled the operation.
    #[error("operation cancelled: {operation}")]
    Cancelled {
        /// The interrupted operation.
        operation: String,
    },

    /// A build attempt failed; the correlation id ties logs to the response.
    #[error("build {correlation_id} failed: {source}")]
    BuildFailed {
        /// Correlation id of the failed attempt.
        correlation_id: BuildId,
        /// The underlying failure.
        #[source]
        source: Box<NamedQueryError>,
    },
}

impl NamedQueryError {
    /// Creates a not-found error for a customer token.
    #[must_use]
    pub fn customer_not_found(token: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type: "customer",
            id: token.into(),
        }
    }

    /// Creates a not-found error for a named query.
    #[must_use]
    pub fn query_not_found(name: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type: "named query",
            id: name.into(),
        }
    }

    /// Creates a catalog error.
    #[must_use]
    pub fn catalog(message: impl Into<String>) -> Self {
        Self::Catalog {
            message: message.into(),
        }
    }

    /// Creates a generation error.
    #[must_use]
    pub fn generation(message: impl Into<String>) -> Self {
        Self::Generation {
            message: message.into(),
        }
    }

    /// Returns the response class for this error.
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Template(_) => ErrorClass::ClientInput,
            Self::NotFound { .. } => ErrorClass::NotFound,
            Self::BuildFailed { source, .. } => match source.class() {
                ErrorClass::ClientInput => ErrorClass::ClientInput,
                _ => ErrorClass::Server,
            },
            Self::Catalog { .. }
            | Self::Generation { .. }
            | Self::Storage(_)
            | Self::Cancelled { .. } => ErrorClass::Server,
        }
    }

    /// Returns true if this error was caused by cancellation.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        match self {
            Self::Cancelled { .. } => true,
            Self::BuildFailed { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// Message safe to show to an external caller.
    ///
    /// Server-class errors expose only the correlation id.
    #[must_use]
    pub fn public_message(&self) -> String {
        match (self.class(), self) {
            (ErrorClass::Server, Self::BuildFailed { correlation_id, .. }) => {
                format!("projection build failed (correlation id {correlation_id})")
            }
            (ErrorClass::Server, _) => "projection request failed".to_string(),
            _ => self.to_string(),
        }
    }
}

impl From<quarry_core::Error> for NamedQueryError {
    fn from(err: quarry_core::Error) -> Self {
        match err {
            quarry_core::Error::Cancelled { operation } => Self::Cancelled { operation },
            other => Self::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_errors_are_client_input() {
        let err = NamedQueryError::from(TemplateError::MissingPositional { index: 2 });
        assert_eq!(err.class(), ErrorClass::ClientInput);
        assert!(err.public_message().contains("placeholder 2"));
    }

    #[test]
    fn not_found_names_the_resource() {
        let err = NamedQueryError::query_not_found("manifest-for-book");
        assert_eq!(err.class(), ErrorClass::NotFound);
        assert_eq!(err.to_string(), "named query not found: manifest-for-book");
    }

    #[test]
    fn server_errors_hide_internals() {
        let id = BuildId::generate();
        let err = NamedQueryError::BuildFailed {
            correlation_id: id,
            source: Box::new(NamedQueryError::Storage(quarry_core::Error::storage(
                "bucket secret-internal-name unavailable",
            ))),
        };
        assert_eq!(err.class(), ErrorClass::Server);
        let public = err.public_message();
        assert!(public.contains(&id.to_string()));
        assert!(!public.contains("secret-internal-name"));
    }

    #[test]
    fn core_cancellation_maps_to_cancelled() {
        let err = NamedQueryError::from(quarry_core::Error::cancelled("catalog query"));
        assert!(err.is_cancelled());
    }
}

//! Error types for the apploy operator
//!
//! Variants carry the name of the `Apps` resource or apployment involved so
//! failures stay attributable once they reach the controller's error policy.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for apploy operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Validation error for an `Apps` spec or operator setting
    #[error("validation error for {target}: {message}")]
    Validation {
        /// Resource or setting that failed validation
        target: String,
        /// Description of what's invalid
        message: String,
        /// The invalid field path (e.g., "spec.apployments.web.app")
        field: Option<String>,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
    },

    /// The reconciliation was cancelled before it finished
    #[error("cancelled [{context}]")]
    Cancelled {
        /// What was in flight when cancellation was observed
        context: String,
    },

    /// Internal/operational error
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "reconciler", "cleanup")
        context: String,
    },
}

impl Error {
    /// Create a validation error with the given message
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            target: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error naming the offending resource
    pub fn validation_for(target: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            target: target.into(),
            message: msg.into(),
            field: None,
        }
    }

    /// Create a validation error with target and field path
    pub fn validation_for_field(
        target: impl Into<String>,
        field: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Validation {
            target: target.into(),
            message: msg.into(),
            field: Some(field.into()),
        }
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
        }
    }

    /// Create a cancellation error
    pub fn cancelled(context: impl Into<String>) -> Self {
        Self::Cancelled {
            context: context.into(),
        }
    }

    /// Create an internal error with the given message
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation and serialization errors need a spec change first.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 409 && ae.code != 429
            ),
            Error::Validation { .. } => false,
            Error::Serialization { .. } => false,
            Error::Cancelled { .. } => true,
            Error::Internal { .. } => true,
        }
    }

    /// True for [`Error::Cancelled`]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::serialization(e.to_string())
    }
}

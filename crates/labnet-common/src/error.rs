//! Unified error types for the labnet workspace.
//!
//! [`LabError`] is the taxonomy surfaced to callers of the control plane.
//! The runtime seam keeps its own error enum and is mapped into this one
//! with operation context by the deployment coordinator.

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum LabError {
    /// A configuration value is invalid (malformed subnet, bad gateway, ...).
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// Every candidate address of the lab subnet is assigned.
    #[error("address pool exhausted: all {capacity} addresses are assigned")]
    PoolExhausted {
        /// Number of candidate addresses in the pool.
        capacity: usize,
    },

    /// The lab network could not be created or inspected.
    #[error("failed to provision network {network}: {message}")]
    NetworkProvision {
        /// Name of the lab network.
        network: String,
        /// Runtime error description.
        message: String,
    },

    /// A deploy request was rejected before any side effect happened.
    #[error("invalid request: {message}")]
    Validation {
        /// Description of the rejected input.
        message: String,
    },

    /// The runtime reported that the requested image does not exist.
    #[error("image '{image}' not found")]
    ImageNotFound {
        /// Image reference from the request.
        image: String,
    },

    /// The runtime failed to create or start the container.
    #[error("deployment of {name} failed: {message}")]
    DeploymentFailed {
        /// Container name of the failed deployment.
        name: String,
        /// Runtime error description.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// The runtime refused to delete a tracked container.
    #[error("removal of {id} failed: {message}")]
    RemovalFailed {
        /// Container identifier.
        id: String,
        /// Runtime error description.
        message: String,
    },

    /// The container runtime could not be reached or timed out.
    #[error("container runtime unavailable: {message}")]
    RuntimeUnavailable {
        /// Description of the failure.
        message: String,
    },

    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

/// Coarse classification of a [`LabError`], used by outer layers to pick
/// a response status without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// The caller sent something unusable.
    InvalidInput,
    /// The referenced resource does not exist.
    NotFound,
    /// A finite resource ran out; retry after cleanup.
    Exhausted,
    /// The operation failed inside the control plane or the runtime.
    Internal,
    /// The runtime could not be reached.
    Unavailable,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInput => write!(f, "invalid_input"),
            Self::NotFound => write!(f, "not_found"),
            Self::Exhausted => write!(f, "exhausted"),
            Self::Internal => write!(f, "internal"),
            Self::Unavailable => write!(f, "unavailable"),
        }
    }
}

impl LabError {
    /// Returns the category of this error.
    pub const fn category(&self) -> ErrorCategory {
        match self {
            Self::Config { .. } | Self::Validation { .. } | Self::Serialization { .. } => {
                ErrorCategory::InvalidInput
            }
            Self::ImageNotFound { .. } | Self::NotFound { .. } => ErrorCategory::NotFound,
            Self::PoolExhausted { .. } => ErrorCategory::Exhausted,
            Self::NetworkProvision { .. }
            | Self::DeploymentFailed { .. }
            | Self::RemovalFailed { .. }
            | Self::Io { .. } => ErrorCategory::Internal,
            Self::RuntimeUnavailable { .. } => ErrorCategory::Unavailable,
        }
    }

    /// Returns the HTTP-equivalent status code for this error.
    pub const fn status_code(&self) -> u16 {
        match self.category() {
            ErrorCategory::InvalidInput => 400,
            ErrorCategory::NotFound => 404,
            ErrorCategory::Exhausted | ErrorCategory::Unavailable => 503,
            ErrorCategory::Internal => 500,
        }
    }

    /// Shorthand for a [`LabError::Config`] error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Shorthand for a [`LabError::Validation`] error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, LabError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn image_not_found_maps_to_404() {
        let err = LabError::ImageNotFound {
            image: "nope:latest".into(),
        };
        assert_eq!(err.category(), ErrorCategory::NotFound);
        assert_eq!(err.status_code(), 404);
        assert_eq!(err.to_string(), "image 'nope:latest' not found");
    }

    #[test]
    fn deployment_and_removal_failures_map_to_500() {
        let deploy = LabError::DeploymentFailed {
            name: "lab-container-1".into(),
            message: "boom".into(),
        };
        let remove = LabError::RemovalFailed {
            id: "abc".into(),
            message: "busy".into(),
        };
        assert_eq!(deploy.status_code(), 500);
        assert_eq!(remove.status_code(), 500);
    }

    #[test]
    fn validation_maps_to_400() {
        let err = LabError::validation("missing 'image' field");
        assert_eq!(err.category(), ErrorCategory::InvalidInput);
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn pool_exhaustion_is_retryable() {
        let err = LabError::PoolExhausted { capacity: 253 };
        assert_eq!(err.category(), ErrorCategory::Exhausted);
        assert_eq!(err.status_code(), 503);
        assert!(err.to_string().contains("253"));
    }
}

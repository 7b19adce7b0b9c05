//! Error types for the controller.
//!
//! Defines custom error types with classification for retry behavior.

use std::time::Duration;
use thiserror::Error;

use crate::resources::ComposeError;

/// Error type for controller operations
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Transient error that should be retried
    #[error("Transient error: {0}")]
    Transient(String),

    /// Some tasks of a pass failed to dispatch; their siblings were still sent.
    #[error("{failed} of {total} tasks failed to dispatch")]
    Dispatch { failed: usize, total: usize },

    /// Status write lost an optimistic-concurrency race
    #[error("Conflicting update: {0}")]
    Conflict(String),

    /// The declared spec cannot be realised
    #[error("Invalid spec: {0}")]
    SpecInvalid(String),

    /// Refused to create an object whose controller reference is incomplete
    #[error("Invalid controller reference: {0}")]
    InvalidControllerRef(String),

    /// Refused to create an object without identity labels
    #[error("Refusing to create {0} without labels")]
    MissingLabels(String),

    /// Template rendering failed
    #[error("Composition failed: {0}")]
    Compose(#[from] ComposeError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 404)
    }

    /// Check if a create failed because the object is already there
    pub fn is_already_exists(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 409 && e.reason == "AlreadyExists")
    }

    /// Check if a write lost an optimistic-concurrency race
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict(_) => true,
            Error::Kube(kube::Error::Api(e)) => e.code == 409 && e.reason != "AlreadyExists",
            _ => false,
        }
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(e) => {
                matches!(
                    e,
                    kube::Error::Api(api_err) if api_err.code >= 500 || api_err.code == 429 || api_err.code == 409
                ) || matches!(e, kube::Error::Service(_))
            }
            Error::Transient(_)
            | Error::Dispatch { .. }
            | Error::Conflict(_) => true,
            Error::SpecInvalid(_)
            | Error::InvalidControllerRef(_)
            | Error::MissingLabels(_)
            | Error::Compose(_)
            | Error::Serialization(_) => false,
        }
    }

    /// Requeue delay used when no per-key backoff applies
    pub fn requeue_after(&self) -> Duration {
        if self.is_retryable() {
            Duration::from_secs(5)
        } else {
            Duration::from_secs(300)
        }
    }
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;

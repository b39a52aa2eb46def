//! Error types for trailgraph

use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrailError {
    /// Missing, invalid or expired credential of either kind.
    #[error("Unauthenticated")]
    Unauthenticated,

    #[error("Request signature mismatch")]
    SignatureMismatch,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Signing key unavailable: {0}")]
    KeyUnavailable(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TrailError {
    /// Whether the error belongs to the authentication class.
    ///
    /// Every member of this class is reported to callers identically.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            TrailError::Unauthenticated
                | TrailError::SignatureMismatch
                | TrailError::InvalidCredentials
        )
    }
}

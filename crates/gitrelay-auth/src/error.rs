//! Error types for the auth crate.

use thiserror::Error;

/// Errors that can occur in authorization operations.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No usable credentials were presented.
    #[error("authentication required")]
    Unauthenticated,

    /// The user lacks permission for the operation.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The access-control backend answered with something unusable.
    #[error("access control backend error: {0}")]
    Backend(String),

    /// The access-control backend could not be reached.
    #[error("access control request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid configuration was provided.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for auth operations.
pub type Result<T> = std::result::Result<T, AuthError>;

//! Error types for clinic-guard.

use thiserror::Error;

/// Common error type for setup and infrastructure.
///
/// Flow-level failures have their own enums (`AuthError`, `VerifyError`,
/// `StoreError`, ...); this one covers configuration, I/O and wiring.
#[derive(Error, Debug)]
pub enum GuardError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Session store error.
    #[error("storage error: {0}")]
    Storage(#[from] crate::store::StoreError),

    /// HTTP client setup error.
    #[error("HTTP client error: {0}")]
    Http(String),

    /// Validation error for user input.
    #[error("validation error: {0}")]
    Validation(String),
}

/// Result type alias for clinic-guard operations.
pub type Result<T> = std::result::Result<T, GuardError>;

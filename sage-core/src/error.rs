// sage-core/src/error.rs

use crate::domain::error::DomainError;
use crate::infrastructure::error::InfrastructureError;
use thiserror::Error;

/// Crate-wide failure type. Validation verdicts never travel through
/// here — anything a sender can cause becomes a `Finding` instead.
/// What remains is programmer and configuration trouble.
#[derive(Error, Debug)]
pub enum SageError {
    /// Expression language and schema-invariant failures.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// IO, parsing, database and HTTP failures.
    #[error(transparent)]
    Infrastructure(#[from] InfrastructureError),

    #[error("Internal Error: {0}")]
    InternalError(String),

    #[error("Unsafe archive entry path: {0}")]
    UnsafePath(String),

    /// Cooperative cancellation: the caller's deadline expired mid-run.
    #[error("Submission cancelled (deadline exceeded)")]
    Cancelled,
}

// io::Error would otherwise need a variant of its own next to the
// Infrastructure one; routing it through there keeps `?` working at
// filesystem call sites without a second conversion path.
impl From<std::io::Error> for SageError {
    fn from(err: std::io::Error) -> Self {
        SageError::Infrastructure(InfrastructureError::Io(err))
    }
}

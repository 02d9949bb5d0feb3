//! Error types for remote calls and sync passes.

use std::time::Duration;
use thiserror::Error;

/// Failure of a single remote store call.
///
/// The retry loop in [`crate::sync`] dispatches on this tag: only
/// [`RemoteError::RateLimited`] is retried.
#[derive(Error, Debug)]
pub enum RemoteError {
    /// The remote asked us to slow down.
    #[error("rate limited by remote store")]
    RateLimited {
        /// Wait requested by the remote, if it sent one.
        retry_after: Option<Duration>,
    },

    /// The object addressed by the call does not exist (anymore).
    #[error("not found in remote store: {0}")]
    NotFound(String),

    /// Anything else: not retried.
    #[error("remote store error: {0}")]
    Permanent(#[from] anyhow::Error),
}

impl RemoteError {
    pub fn rate_limited(retry_after: Option<Duration>) -> Self {
        Self::RateLimited { retry_after }
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }

    pub fn permanent(message: impl std::fmt::Display) -> Self {
        Self::Permanent(anyhow::anyhow!("{}", message))
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, RemoteError::RateLimited { .. })
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, RemoteError::NotFound(_))
    }
}

/// Why a single document was skipped during a pass.
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("failed to read document: {0}")]
    Io(#[from] std::io::Error),

    #[error("{operation} failed: {source}")]
    Remote {
        operation: &'static str,
        #[source]
        source: RemoteError,
    },

    #[error("{operation} still rate limited after {attempts} attempts")]
    RetriesExhausted {
        operation: &'static str,
        attempts: u32,
    },
}

/// Errors that abort a whole sync pass.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("sync cancelled")]
    Cancelled,

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("{operation} still rate limited after {attempts} attempts")]
    RetriesExhausted {
        operation: &'static str,
        attempts: u32,
    },
}

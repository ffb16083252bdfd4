//! Transport and definition-loading error taxonomy.
//!
//! Mirrors `spec.md` §7's Transport category: auth/host-key failures
//! are fatal per attempt, connection-lost/timeout are retryable and
//! invalidate the session cache.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunbookError {
    #[error("definition not found: {0}")]
    NotFound(String),

    #[error("failed to load runbook definitions from {path}: {source_msg}")]
    Load { path: String, source_msg: String },

    #[error("authentication failed for {host}: {reason}")]
    AuthFailed { host: String, reason: String },

    #[error("host key verification failed for {0}")]
    HostKeyFailed(String),

    #[error("connection lost to {0}")]
    ConnectionLost(String),

    #[error("timed out after {0}s")]
    Timeout(u64),

    #[error("transport protocol error: {0}")]
    Protocol(String),

    #[error("script execution error: {0}")]
    Script(String),
}

impl RunbookError {
    /// Per `spec.md` §7: auth and host-key failures never retry;
    /// connection-lost and timeout do.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RunbookError::ConnectionLost(_) | RunbookError::Timeout(_))
    }

    /// Whether this failure should invalidate a cached session.
    pub fn invalidates_session(&self) -> bool {
        matches!(
            self,
            RunbookError::AuthFailed { .. } | RunbookError::HostKeyFailed(_) | RunbookError::ConnectionLost(_)
        )
    }
}

pub type RunbookResult<T> = Result<T, RunbookError>;

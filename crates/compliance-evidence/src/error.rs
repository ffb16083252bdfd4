use thiserror::Error;

#[derive(Debug, Error)]
pub enum EvidenceError {
    #[error("store error: {0}")]
    Store(#[from] compliance_store::StoreError),
    #[error("signing key error: {0}")]
    Signing(String),
    #[error("upload authentication failed: {0}")]
    AuthFailure(String),
    #[error("upload transport not configured for mode {0:?}")]
    TransportNotConfigured(compliance_common::config::WormMode),
    #[error("upload request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("upload failed after {attempts} attempts: {last_error}")]
    RetriesExhausted { attempts: u32, last_error: String },
    #[error("bundle {0} not found")]
    BundleNotFound(uuid::Uuid),
}

pub type EvidenceResult<T> = Result<T, EvidenceError>;

impl EvidenceError {
    /// Authentication failures are never worth retrying; every other
    /// transport error gets the exponential-backoff treatment.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, EvidenceError::AuthFailure(_))
    }
}

//! Store-local error type, composed into `ApplianceError` at call sites.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("invariant I1 violation: medical device not opted in must be excluded")]
    MedicalInvariant,
}

pub type StoreResult<T> = Result<T, StoreError>;

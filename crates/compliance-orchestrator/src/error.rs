//! Error taxonomy for the scan pipeline, scheduler, and HTTP surface.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("store error: {0}")]
    Store(#[from] compliance_store::StoreError),

    #[error("discovery error: {0}")]
    Discovery(#[from] compliance_discovery::DiscoveryError),

    #[error("evidence error: {0}")]
    Evidence(#[from] compliance_evidence::EvidenceError),

    #[error("scan {0} is already running")]
    ScanInFlight(uuid::Uuid),

    #[error("no enabled discovery methods configured")]
    NoDiscoveryMethods,

    #[error("device not found: {0}")]
    DeviceNotFound(uuid::Uuid),

    #[error("central replication target not configured")]
    CentralNotConfigured,

    #[error("replication request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

pub type OrchestratorResult<T> = Result<T, OrchestratorError>;

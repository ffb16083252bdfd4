//! Error taxonomy shared across the appliance

use thiserror::Error;

/// Top-level appliance error, composed from each component's own error type.
#[derive(Error, Debug)]
pub enum ApplianceError {
    /// Inventory store failure
    #[error("store error: {0}")]
    Store(String),

    /// Discovery method failure
    #[error("discovery error: {0}")]
    Discovery(String),

    /// Runbook execution failure
    #[error("runbook error: {0}")]
    Runbook(String),

    /// Healing engine failure
    #[error("healing error: {0}")]
    Healing(String),

    /// Evidence/WORM failure
    #[error("evidence error: {0}")]
    Evidence(String),

    /// Invariant violation (I1-I4)
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for appliance-wide operations
pub type ApplianceResult<T> = Result<T, ApplianceError>;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum HealingError {
    #[error("store error: {0}")]
    Store(#[from] compliance_store::StoreError),
    #[error("runbook error: {0}")]
    Runbook(#[from] compliance_runbooks::RunbookError),
    #[error("validation failed: {0:?}")]
    Validation(Vec<String>),
    #[error("rate limited, retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },
    #[error("circuit open for {path}")]
    CircuitOpen { path: String },
    #[error("parameter '{param}' not in whitelist for action '{action}'")]
    ParameterRejected { action: String, param: String },
    #[error("action requires approval: {0}")]
    ApprovalRequired(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("rule load error at {path}: {source_msg}")]
    RuleLoad { path: String, source_msg: String },
}

pub type HealingResult<T> = Result<T, HealingError>;

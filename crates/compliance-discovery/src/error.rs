use thiserror::Error;

#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("directory query failed: {0}")]
    Directory(String),

    #[error("neighbor table read failed: {0}")]
    Neighbor(String),

    #[error("portscan failed: {0}")]
    Portscan(String),

    #[error("agent registry error: {0}")]
    Agent(String),

    #[error("method unavailable: {0}")]
    Unavailable(String),
}

pub type DiscoveryResult<T> = Result<T, DiscoveryError>;

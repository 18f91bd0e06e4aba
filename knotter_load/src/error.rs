use thiserror::Error;

/// Errors raised while setting up or finishing a load run.
///
/// Failed requests are not errors: they are recorded in the metrics and the
/// session carries on.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid target host `{host}`: {reason}")]
    InvalidHost { host: String, reason: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),

    #[error("task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("failed to write report: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to serialize report: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T, E = LoadError> = std::result::Result<T, E>;

use crate::store::StoreError;
use thiserror::Error;

pub type Result<T> = core::result::Result<T, DevConnectError>;

#[derive(Error, Debug)]
pub enum DevConnectError {
    #[error("Filesystem error: {0}")]
    Filesystem(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Message content is empty")]
    EmptyContent,

    #[error("No authenticated user")]
    Unauthenticated,

    #[error("Invalid channel name: {0}")]
    InvalidName(String),

    #[error("Channel already exists: {0}")]
    DuplicateChannel(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<Box<dyn std::error::Error + Send + Sync>> for DevConnectError {
    fn from(err: Box<dyn std::error::Error + Send + Sync>) -> Self {
        DevConnectError::Other(anyhow::anyhow!(err.to_string()))
    }
}

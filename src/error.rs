use std::error::Error;
use std::time::Duration;

use thiserror::Error;

/// Failures of the queue transport: connecting, publishing, receiving or
/// settling a delivery. The consumer never retries these itself.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("queue transport unavailable: {0}")]
    Unavailable(String),

    #[error("queue transport is closed")]
    Closed,

    #[error("delivery {0} is not in flight")]
    UnknownDelivery(u64),

    #[error("queue storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("message encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

/// Failure of a single action attempt. Every variant consumes one retry.
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("{0}")]
    Failed(Box<dyn Error + Send + Sync>),

    #[error("attempt timed out after {0:?}")]
    TimedOut(Duration),

    #[error("payload could not be decoded: {0}")]
    InvalidPayload(#[from] serde_json::Error),
}

impl From<Box<dyn Error + Send + Sync>> for ActionError {
    fn from(err: Box<dyn Error + Send + Sync>) -> Self {
        ActionError::Failed(err)
    }
}

impl From<&str> for ActionError {
    fn from(message: &str) -> Self {
        ActionError::Failed(message.into())
    }
}

impl From<String> for ActionError {
    fn from(message: String) -> Self {
        ActionError::Failed(message.into())
    }
}

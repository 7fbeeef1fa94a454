use async_trait::async_trait;

use crate::error::ActionError;
use crate::transport::{retry_attributes, Attributes, Delivery};

pub mod order_email;
pub mod retry;

pub use retry::RetryPolicy;

/// The side effect a consumer performs for every delivered payload.
///
/// Any error consumes one retry; the consumer does not look at its kind.
#[async_trait]
pub trait Action: Send + Sync {
    async fn execute(&self, payload: &[u8]) -> Result<(), ActionError>;
}

/// A unit of work: the payload plus how many times it was already retried.
///
/// The retry count lives in message attributes, never in the payload, so
/// two copies of the same payload can carry different counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    pub payload: Vec<u8>,
    pub retry_count: u32,
}

impl Task {
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            retry_count: 0,
        }
    }

    pub fn from_delivery(delivery: &Delivery) -> Self {
        Self {
            payload: delivery.payload.clone(),
            retry_count: delivery.retry_count(),
        }
    }

    /// The copy that gets re-published when this attempt fails.
    pub fn next_attempt(&self) -> Self {
        Self {
            payload: self.payload.clone(),
            retry_count: self.retry_count.saturating_add(1),
        }
    }

    pub fn attributes(&self) -> Attributes {
        retry_attributes(self.retry_count)
    }
}

use std::collections::BTreeMap;

use async_trait::async_trait;
use log::warn;
use serde_json::Value;

use crate::error::TransportError;

pub mod implementations;
pub use implementations::*;

/// Attribute carrying the number of times a task has already been retried.
pub const RETRY_COUNT_ATTRIBUTE: &str = "x-retry-count";

/// Message metadata travelling next to the payload.
pub type Attributes = BTreeMap<String, Value>;

/// A message handed to exactly one consumer and held until it is settled.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Transport-assigned handle used to ack or nack this delivery
    pub tag: u64,
    pub topic: String,
    pub payload: Vec<u8>,
    pub attributes: Attributes,
}

impl Delivery {
    pub fn retry_count(&self) -> u32 {
        retry_count(&self.attributes)
    }
}

/// Reads the retry counter from message attributes.
///
/// A missing attribute means the message was never retried. Values that are
/// not non-negative integers are logged and read as 0; oversized values
/// saturate so they still count as exhausted.
pub fn retry_count(attributes: &Attributes) -> u32 {
    let Some(value) = attributes.get(RETRY_COUNT_ATTRIBUTE) else {
        return 0;
    };

    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };

    match parsed {
        Some(n) => u32::try_from(n).unwrap_or(u32::MAX),
        None => {
            warn!(
                "Ignoring malformed '{}' attribute {}, treating it as 0",
                RETRY_COUNT_ATTRIBUTE, value
            );
            0
        }
    }
}

/// Builds the attribute map for a message on its `retry_count`-th retry.
pub fn retry_attributes(retry_count: u32) -> Attributes {
    let mut attributes = Attributes::new();
    attributes.insert(RETRY_COUNT_ATTRIBUTE.to_string(), Value::from(retry_count));
    attributes
}

/// The durable queue the consumer pulls from and publishes retries to.
///
/// Each delivery returned by `receive` is owned by one caller until it is
/// acked or nacked. Implementations provide that exclusion, so several
/// consumers may share one queue.
#[async_trait]
pub trait QueueTransport: Send + Sync {
    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        attributes: &Attributes,
        durable: bool,
    ) -> Result<(), TransportError>;

    /// Takes the next ready message on `topic`, if any, without waiting.
    async fn receive(&self, topic: &str) -> Result<Option<Delivery>, TransportError>;

    /// Permanently removes a delivered message.
    async fn ack(&self, delivery: &Delivery) -> Result<(), TransportError>;

    /// Gives a delivered message back; with `requeue` false it is dropped.
    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), TransportError>;

    /// Releases the connection. Unsettled deliveries become ready again.
    async fn close(&self) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests;

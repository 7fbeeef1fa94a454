use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use std::ops::Range;
use std::sync::Arc;
use std::time::Duration;

use crate::error::TransportError;
use crate::transport::{retry_attributes, Attributes, QueueTransport};

/// Payload published for every placed order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderMessage {
    #[serde(rename = "orderId")]
    pub order_id: u64,
}

/// Places tasks onto a durable topic.
///
/// Publishing is at-least-once: a caller may retry a failed `enqueue`, and
/// consumers tolerate the duplicate because the retry count travels with
/// each queued copy.
pub struct TaskEnqueuer {
    transport: Arc<dyn QueueTransport>,
    topic: String,
}

impl TaskEnqueuer {
    pub fn new(transport: Arc<dyn QueueTransport>, topic: impl Into<String>) -> Self {
        Self {
            transport,
            topic: topic.into(),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub async fn enqueue(&self, payload: &[u8]) -> Result<(), TransportError> {
        self.enqueue_with_retry_count(payload, 0).await
    }

    /// Fresh tasks carry no retry attribute; the consumer reads that as 0.
    pub async fn enqueue_with_retry_count(
        &self,
        payload: &[u8],
        retry_count: u32,
    ) -> Result<(), TransportError> {
        let attributes = if retry_count == 0 {
            Attributes::new()
        } else {
            retry_attributes(retry_count)
        };
        self.transport
            .publish(&self.topic, payload, &attributes, true)
            .await?;
        debug!(
            "Enqueued {} byte(s) on '{}' (retry {})",
            payload.len(),
            self.topic,
            retry_count
        );
        Ok(())
    }

    pub async fn enqueue_json<T: Serialize + ?Sized>(&self, record: &T) -> Result<(), TransportError> {
        let payload = serde_json::to_vec(record)?;
        self.enqueue(&payload).await
    }

    /// Places one order per id in `order_ids`, waiting `create_delay` before
    /// each to stand in for creating the order. The transport is closed on
    /// every path; the first error wins. Returns how many orders were queued.
    pub async fn enqueue_orders(
        &self,
        order_ids: Range<u64>,
        create_delay: Duration,
    ) -> Result<u64, TransportError> {
        let queued = self.publish_orders(order_ids, create_delay).await;
        let closed = self.transport.close().await;
        match (queued, closed) {
            (Err(err), Err(close_err)) => {
                error!("Failed to close transport: {}", close_err);
                Err(err)
            }
            (Err(err), Ok(())) => Err(err),
            (Ok(queued), closed) => closed.map(|()| queued),
        }
    }

    async fn publish_orders(
        &self,
        order_ids: Range<u64>,
        create_delay: Duration,
    ) -> Result<u64, TransportError> {
        let mut queued = 0;
        for order_id in order_ids {
            if !create_delay.is_zero() {
                debug!("Creating order {}", order_id);
                tokio::time::sleep(create_delay).await;
            }
            self.enqueue_json(&OrderMessage { order_id }).await?;
            info!("Order {} queued on '{}'", order_id, self.topic);
            queued += 1;
        }
        Ok(queued)
    }
}

#[cfg(test)]
mod tests;

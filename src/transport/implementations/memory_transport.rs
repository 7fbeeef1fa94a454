use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::TransportError;
use crate::transport::{retry_count, Attributes, Delivery, QueueTransport};

/// A settled or published message, recorded in call order.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportCall {
    Publish {
        topic: String,
        payload: Vec<u8>,
        attributes: Attributes,
        durable: bool,
    },
    Ack {
        tag: u64,
        retry_count: u32,
    },
    Nack {
        tag: u64,
        requeue: bool,
    },
}

#[derive(Debug, Clone)]
struct StoredMessage {
    payload: Vec<u8>,
    attributes: Attributes,
}

#[derive(Default)]
struct MemoryQueue {
    topics: HashMap<String, VecDeque<StoredMessage>>,
    in_flight: HashMap<u64, Delivery>,
    next_tag: u64,
    closed: bool,
    failing_publishes: usize,
    failing_acks: usize,
    calls: Vec<TransportCall>,
}

/// In-memory implementation of QueueTransport for tests and demos
#[derive(Clone, Default)]
pub struct MemoryTransport {
    queue: Arc<Mutex<MemoryQueue>>,
}

impl MemoryTransport {
    /// Create a new empty memory transport
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryQueue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `count` publishes fail with `TransportError::Unavailable`
    pub fn fail_next_publishes(&self, count: usize) {
        self.lock().failing_publishes = count;
    }

    /// Make the next `count` acks fail with `TransportError::Unavailable`
    pub fn fail_next_acks(&self, count: usize) {
        self.lock().failing_acks = count;
    }

    /// Every successful publish, ack and nack so far
    pub fn calls(&self) -> Vec<TransportCall> {
        self.lock().calls.clone()
    }

    pub fn publish_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, TransportCall::Publish { .. }))
            .count()
    }

    pub fn ack_count(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, TransportCall::Ack { .. }))
            .count()
    }

    /// Ready messages on `topic` as (payload, attributes), head first
    pub fn queued(&self, topic: &str) -> Vec<(Vec<u8>, Attributes)> {
        self.lock()
            .topics
            .get(topic)
            .map(|messages| {
                messages
                    .iter()
                    .map(|m| (m.payload.clone(), m.attributes.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

#[async_trait]
impl QueueTransport for MemoryTransport {
    async fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        attributes: &Attributes,
        durable: bool,
    ) -> Result<(), TransportError> {
        let mut queue = self.lock();
        if queue.closed {
            return Err(TransportError::Closed);
        }
        if queue.failing_publishes > 0 {
            queue.failing_publishes -= 1;
            return Err(TransportError::Unavailable(format!(
                "publish to '{}' rejected",
                topic
            )));
        }

        queue
            .topics
            .entry(topic.to_string())
            .or_default()
            .push_back(StoredMessage {
                payload: payload.to_vec(),
                attributes: attributes.clone(),
            });
        queue.calls.push(TransportCall::Publish {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            attributes: attributes.clone(),
            durable,
        });
        Ok(())
    }

    async fn receive(&self, topic: &str) -> Result<Option<Delivery>, TransportError> {
        let mut queue = self.lock();
        if queue.closed {
            return Err(TransportError::Closed);
        }

        let Some(message) = queue.topics.get_mut(topic).and_then(VecDeque::pop_front) else {
            return Ok(None);
        };

        queue.next_tag += 1;
        let delivery = Delivery {
            tag: queue.next_tag,
            topic: topic.to_string(),
            payload: message.payload,
            attributes: message.attributes,
        };
        queue.in_flight.insert(delivery.tag, delivery.clone());
        Ok(Some(delivery))
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), TransportError> {
        let mut queue = self.lock();
        if queue.closed {
            return Err(TransportError::Closed);
        }
        if queue.failing_acks > 0 {
            queue.failing_acks -= 1;
            return Err(TransportError::Unavailable(format!(
                "ack of delivery {} rejected",
                delivery.tag
            )));
        }

        let settled = queue
            .in_flight
            .remove(&delivery.tag)
            .ok_or(TransportError::UnknownDelivery(delivery.tag))?;
        queue.calls.push(TransportCall::Ack {
            tag: settled.tag,
            retry_count: retry_count(&settled.attributes),
        });
        Ok(())
    }

    async fn nack(&self, delivery: &Delivery, requeue: bool) -> Result<(), TransportError> {
        let mut queue = self.lock();
        if queue.closed {
            return Err(TransportError::Closed);
        }

        let settled = queue
            .in_flight
            .remove(&delivery.tag)
            .ok_or(TransportError::UnknownDelivery(delivery.tag))?;
        if requeue {
            queue
                .topics
                .entry(settled.topic)
                .or_default()
                .push_front(StoredMessage {
                    payload: settled.payload,
                    attributes: settled.attributes,
                });
        }
        queue.calls.push(TransportCall::Nack {
            tag: delivery.tag,
            requeue,
        });
        Ok(())
    }

    async fn close(&self) -> Result<(), TransportError> {
        let mut queue = self.lock();
        let MemoryQueue {
            topics, in_flight, ..
        } = &mut *queue;

        let mut unsettled: Vec<Delivery> = in_flight.drain().map(|(_, d)| d).collect();
        unsettled.sort_by_key(|d| std::cmp::Reverse(d.tag));
        for delivery in unsettled {
            topics
                .entry(delivery.topic)
                .or_default()
                .push_front(StoredMessage {
                    payload: delivery.payload,
                    attributes: delivery.attributes,
                });
        }
        queue.closed = true;
        Ok(())
    }
}

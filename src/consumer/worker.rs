use log::{debug, error, info, warn};
use serde_json::Value;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::task::Poll;
use tokio::sync::Mutex as AsyncMutex;
use tokio::time::sleep;

use super::executor::{self, Attempt};
use super::options::{ConsumerOptions, PREFETCH};
use super::outcome::{AckDecision, Outcome};
use super::report::{ConsumerStats, DeliveryReport, ExhaustedReport};
use super::sink::{FailureSink, LogSink};
use crate::error::{ActionError, TransportError};
use crate::task::{Action, Task};
use crate::transport::{Attributes, Delivery, QueueTransport};

/// Log target of the one line emitted per processed delivery.
pub const DELIVERY_LOG_TARGET: &str = "retry_worker::delivery";

const DEAD_LETTER_ERROR_ATTRIBUTE: &str = "x-last-error";
const DEAD_LETTER_ORIGIN_ATTRIBUTE: &str = "x-original-topic";

struct Settled {
    outcome: Outcome,
    error: Option<String>,
    dead_lettered: bool,
}

/// Pulls deliveries one at a time, runs the action and retries failures by
/// re-publishing them with an incremented retry count.
///
/// The consumer owns its transport and closes it when `run` returns.
/// At most one delivery is held at a time, even when `process_next` or
/// `handle_delivery` are called concurrently on a shared consumer.
pub struct Consumer {
    transport: Arc<dyn QueueTransport>,
    action: Arc<dyn Action>,
    sink: Arc<dyn FailureSink>,
    options: ConsumerOptions,
    stats: Mutex<ConsumerStats>,
    /// Held from receive until the delivery is settled
    slot: AsyncMutex<()>,
}

impl Consumer {
    pub fn new(
        transport: Arc<dyn QueueTransport>,
        action: Arc<dyn Action>,
        options: ConsumerOptions,
    ) -> Self {
        Self {
            transport,
            action,
            sink: Arc::new(LogSink),
            options,
            stats: Mutex::new(ConsumerStats::default()),
            slot: AsyncMutex::new(()),
        }
    }

    pub fn with_failure_sink(mut self, sink: Arc<dyn FailureSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn options(&self) -> &ConsumerOptions {
        &self.options
    }

    pub fn stats(&self) -> ConsumerStats {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Consumes until `shutdown` resolves or the transport fails, then
    /// closes the transport on either path.
    ///
    /// Shutdown is only observed between deliveries: a delivery that was
    /// received is always carried to its outcome first.
    pub async fn run<F>(&self, shutdown: F) -> Result<(), TransportError>
    where
        F: Future<Output = ()>,
    {
        info!(
            "Consumer listening on '{}' (prefetch {}, max retries {})",
            self.options.topic, PREFETCH, self.options.retry_policy.max_retries
        );

        let result = self.consume(shutdown).await;
        let closed = self.transport.close().await;

        let stats = self.stats();
        info!(
            "Consumer on '{}' stopped after {} deliveries ({} succeeded, {} retried, {} exhausted)",
            self.options.topic, stats.processed(), stats.succeeded, stats.retried, stats.exhausted
        );

        match (result, closed) {
            (Err(err), Err(close_err)) => {
                error!("Failed to close transport: {}", close_err);
                Err(err)
            }
            (Err(err), Ok(())) => Err(err),
            (Ok(()), closed) => closed,
        }
    }

    async fn consume<F>(&self, shutdown: F) -> Result<(), TransportError>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            if let Poll::Ready(()) = futures::poll!(shutdown.as_mut()) {
                info!("Shutdown requested, stopping consumer");
                return Ok(());
            }

            if self.process_next().await?.is_some() {
                continue;
            }

            tokio::select! {
                _ = shutdown.as_mut() => {
                    info!("Shutdown requested, stopping consumer");
                    return Ok(());
                }
                _ = sleep(self.options.poll_interval) => {}
            }
        }
    }

    /// Receives and fully handles the next delivery; `None` if the topic is empty.
    ///
    /// Waits for any delivery already in progress before receiving.
    pub async fn process_next(&self) -> Result<Option<DeliveryReport>, TransportError> {
        let _slot = self.slot.lock().await;
        match self.transport.receive(&self.options.topic).await? {
            Some(delivery) => self.drive(delivery).await.map(Some),
            None => Ok(None),
        }
    }

    /// Drives one received delivery to `succeeded`, `retried` or `exhausted`.
    ///
    /// A `TransportError` means the delivery was not acknowledged.
    pub async fn handle_delivery(&self, delivery: Delivery) -> Result<DeliveryReport, TransportError> {
        let _slot = self.slot.lock().await;
        self.drive(delivery).await
    }

    async fn drive(&self, delivery: Delivery) -> Result<DeliveryReport, TransportError> {
        let task = Task::from_delivery(&delivery);
        debug!(
            "Received delivery {} on '{}' (retry {})",
            delivery.tag, delivery.topic, task.retry_count
        );

        let Attempt { result, duration } = executor::run_attempt(
            self.action.as_ref(),
            &task.payload,
            self.options.retry_policy.attempt_timeout,
        )
        .await;

        let settled = match self.settle_attempt(&delivery, &task, result).await {
            Ok(settled) => settled,
            Err(err) => {
                error!(
                    target: DELIVERY_LOG_TARGET,
                    "topic={} outcome=unsettled retry_count={} duration_ms={} error=\"{}\"",
                    delivery.topic,
                    task.retry_count,
                    duration.as_millis(),
                    err
                );
                return Err(err);
            }
        };

        let report = DeliveryReport {
            topic: delivery.topic.clone(),
            outcome: settled.outcome,
            retry_count: task.retry_count,
            duration,
            error: settled.error,
            dead_lettered: settled.dead_lettered,
        };
        info!(
            target: DELIVERY_LOG_TARGET,
            "topic={} outcome={} retry_count={} duration_ms={}",
            report.topic,
            report.outcome,
            report.retry_count,
            report.duration.as_millis()
        );
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .record(&report);
        Ok(report)
    }

    async fn settle_attempt(
        &self,
        delivery: &Delivery,
        task: &Task,
        result: Result<(), ActionError>,
    ) -> Result<Settled, TransportError> {
        let err = match result {
            Ok(()) => {
                self.settle(delivery, AckDecision::Ack).await?;
                return Ok(Settled {
                    outcome: Outcome::Succeeded,
                    error: None,
                    dead_lettered: false,
                });
            }
            Err(err) => err,
        };

        let policy = &self.options.retry_policy;
        warn!(
            "Attempt {}/{} for delivery {} on '{}' failed: {}",
            task.retry_count.saturating_add(1),
            policy.max_retries.saturating_add(1),
            delivery.tag,
            delivery.topic,
            err
        );

        if policy.should_retry(task.retry_count) {
            self.schedule_retry(delivery, task).await?;
            Ok(Settled {
                outcome: Outcome::Retried,
                error: Some(err.to_string()),
                dead_lettered: false,
            })
        } else {
            let dead_lettered = self.exhaust(delivery, task, &err).await?;
            Ok(Settled {
                outcome: Outcome::Exhausted,
                error: Some(err.to_string()),
                dead_lettered,
            })
        }
    }

    /// Re-publishes the task with `retry_count + 1`, then acks the original.
    async fn schedule_retry(&self, delivery: &Delivery, task: &Task) -> Result<(), TransportError> {
        let retry = task.next_attempt();
        let delay = self.options.retry_policy.retry_delay;
        if !delay.is_zero() {
            debug!("Delaying retry of delivery {} by {:?}", delivery.tag, delay);
            sleep(delay).await;
        }

        info!(
            "Retrying delivery {} on '{}' as retry {}",
            delivery.tag, delivery.topic, retry.retry_count
        );
        self.publish_or_release(delivery, &delivery.topic, &retry.payload, &retry.attributes())
            .await?;
        self.settle(delivery, AckDecision::Ack).await
    }

    /// Forwards to the dead-letter topic if one is configured, reports the
    /// terminal failure, then acks. Returns whether the task was forwarded.
    async fn exhaust(
        &self,
        delivery: &Delivery,
        task: &Task,
        err: &ActionError,
    ) -> Result<bool, TransportError> {
        let dead_lettered = match &self.options.retry_policy.dead_letter_topic {
            Some(dead_letter_topic) => {
                let mut attributes = task.attributes();
                attributes.insert(
                    DEAD_LETTER_ERROR_ATTRIBUTE.to_string(),
                    Value::from(err.to_string()),
                );
                attributes.insert(
                    DEAD_LETTER_ORIGIN_ATTRIBUTE.to_string(),
                    Value::from(delivery.topic.clone()),
                );
                self.publish_or_release(delivery, dead_letter_topic, &task.payload, &attributes)
                    .await?;
                true
            }
            None => false,
        };

        self.sink
            .report(&ExhaustedReport {
                topic: delivery.topic.clone(),
                payload: task.payload.clone(),
                retry_count: task.retry_count,
                error: err.to_string(),
            })
            .await;

        self.settle(delivery, AckDecision::Ack).await?;
        Ok(dead_lettered)
    }

    /// Publishes on behalf of `delivery`. If that fails the delivery is handed
    /// back unacknowledged so the transport redelivers it.
    async fn publish_or_release(
        &self,
        delivery: &Delivery,
        topic: &str,
        payload: &[u8],
        attributes: &Attributes,
    ) -> Result<(), TransportError> {
        if let Err(err) = self.transport.publish(topic, payload, attributes, true).await {
            error!(
                "Publish to '{}' failed, leaving delivery {} unacknowledged: {}",
                topic, delivery.tag, err
            );
            if let Err(nack_err) = self.settle(delivery, AckDecision::Nack).await {
                warn!("Could not release delivery {}: {}", delivery.tag, nack_err);
            }
            return Err(err);
        }
        Ok(())
    }

    async fn settle(&self, delivery: &Delivery, decision: AckDecision) -> Result<(), TransportError> {
        match decision {
            AckDecision::Ack => self.transport.ack(delivery).await,
            AckDecision::Nack => self.transport.nack(delivery, true).await,
        }
    }
}

#[cfg(test)]
mod tests;

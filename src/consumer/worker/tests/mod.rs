use super::*;
use crate::consumer::{MemorySink, Outcome};
use crate::task::RetryPolicy;
use crate::transport::{retry_attributes, MemoryTransport, TransportCall, RETRY_COUNT_ATTRIBUTE};
use async_trait::async_trait;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

const TOPIC: &str = "email_queue";

// Mock action failing a fixed number of times
struct MockAction {
    failures: usize,
    calls: AtomicUsize,
    delay: Duration,
}

impl MockAction {
    fn failing(failures: usize) -> Self {
        Self {
            failures,
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Action for MockAction {
    async fn execute(&self, _payload: &[u8]) -> Result<(), ActionError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.delay).await;
        if call <= self.failures {
            Err(format!("attempt {} failed", call).into())
        } else {
            Ok(())
        }
    }
}

fn consumer_with(
    transport: &MemoryTransport,
    action: MockAction,
    policy: RetryPolicy,
) -> Consumer {
    Consumer::new(
        Arc::new(transport.clone()),
        Arc::new(action),
        ConsumerOptions::new(TOPIC).with_retry_policy(policy),
    )
}

async fn seed(transport: &MemoryTransport, retry_count: u32) {
    let attributes = if retry_count == 0 {
        Attributes::new()
    } else {
        retry_attributes(retry_count)
    };
    transport
        .publish(TOPIC, br#"{"orderId":1}"#, &attributes, true)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_success_acks_without_publishing() {
    let transport = MemoryTransport::new();
    seed(&transport, 0).await;
    let consumer = consumer_with(&transport, MockAction::failing(0), RetryPolicy::default());

    let report = consumer.process_next().await.unwrap().unwrap();

    assert_eq!(report.outcome, Outcome::Succeeded);
    assert_eq!(report.retry_count, 0);
    assert_eq!(report.error, None);
    let calls = transport.calls();
    assert_eq!(calls.len(), 2);
    assert!(matches!(calls[1], TransportCall::Ack { retry_count: 0, .. }));
}

#[tokio::test]
async fn test_failure_republishes_before_acking() {
    let transport = MemoryTransport::new();
    seed(&transport, 0).await;
    let consumer = consumer_with(&transport, MockAction::failing(1), RetryPolicy::default());

    let report = consumer.process_next().await.unwrap().unwrap();

    assert_eq!(report.outcome, Outcome::Retried);
    assert_eq!(report.error.as_deref(), Some("attempt 1 failed"));

    // seed publish, retry publish, then the ack of the original
    let calls = transport.calls();
    assert_eq!(calls.len(), 3);
    match &calls[1] {
        TransportCall::Publish {
            topic,
            payload,
            attributes,
            durable,
        } => {
            assert_eq!(topic, TOPIC);
            assert_eq!(payload, br#"{"orderId":1}"#);
            assert_eq!(attributes.get(RETRY_COUNT_ATTRIBUTE), Some(&json!(1)));
            assert!(*durable);
        }
        other => panic!("expected the retry publish, got {:?}", other),
    }
    assert!(matches!(calls[2], TransportCall::Ack { retry_count: 0, .. }));
}

#[tokio::test]
async fn test_failure_at_limit_is_exhausted_and_reported() {
    let transport = MemoryTransport::new();
    seed(&transport, 3).await;
    let sink = Arc::new(MemorySink::new());
    let consumer = consumer_with(&transport, MockAction::failing(1), RetryPolicy::default())
        .with_failure_sink(sink.clone());

    let report = consumer.process_next().await.unwrap().unwrap();

    assert_eq!(report.outcome, Outcome::Exhausted);
    assert!(!report.dead_lettered);
    assert_eq!(transport.publish_count(), 1);
    assert_eq!(transport.ack_count(), 1);
    assert!(transport.queued(TOPIC).is_empty());

    let reports = sink.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].retry_count, 3);
    assert_eq!(reports[0].payload_lossy(), r#"{"orderId":1}"#);
    assert_eq!(reports[0].error, "attempt 1 failed");
}

#[tokio::test]
async fn test_retry_count_above_limit_counts_as_exhausted() {
    let transport = MemoryTransport::new();
    seed(&transport, 9).await;
    let consumer = consumer_with(&transport, MockAction::failing(1), RetryPolicy::default());

    let report = consumer.process_next().await.unwrap().unwrap();
    assert_eq!(report.outcome, Outcome::Exhausted);
    assert_eq!(report.retry_count, 9);
    assert_eq!(transport.publish_count(), 1);
}

#[tokio::test]
async fn test_publish_failure_leaves_delivery_unacknowledged() {
    let transport = MemoryTransport::new();
    seed(&transport, 1).await;
    transport.fail_next_publishes(1);
    let consumer = consumer_with(&transport, MockAction::failing(1), RetryPolicy::default());

    let err = consumer.process_next().await.unwrap_err();

    assert!(matches!(err, TransportError::Unavailable(_)));
    assert_eq!(transport.ack_count(), 0);
    assert!(transport
        .calls()
        .iter()
        .any(|call| matches!(call, TransportCall::Nack { requeue: true, .. })));

    // The original copy is back on the queue with its old retry count.
    let queued = transport.queued(TOPIC);
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].1.get(RETRY_COUNT_ATTRIBUTE), Some(&json!(1)));
    assert_eq!(consumer.stats().processed(), 0);
}

#[tokio::test]
async fn test_ack_failure_after_success_is_surfaced() {
    let transport = MemoryTransport::new();
    seed(&transport, 0).await;
    transport.fail_next_acks(1);
    let consumer = consumer_with(&transport, MockAction::failing(0), RetryPolicy::default());

    let result = consumer.process_next().await;

    tokio_test::assert_err!(result);
    assert_eq!(transport.in_flight(), 1);
}

#[tokio::test]
async fn test_exhausted_task_forwarded_to_dead_letter_topic() {
    let transport = MemoryTransport::new();
    seed(&transport, 0).await;
    let policy = RetryPolicy::default()
        .with_max_retries(0)
        .with_dead_letter_topic("email_queue.dead");
    let consumer = consumer_with(&transport, MockAction::failing(1), policy);

    let report = consumer.process_next().await.unwrap().unwrap();

    assert_eq!(report.outcome, Outcome::Exhausted);
    assert!(report.dead_lettered);
    let dead = transport.queued("email_queue.dead");
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].0, br#"{"orderId":1}"#);
    assert_eq!(dead[0].1.get(RETRY_COUNT_ATTRIBUTE), Some(&json!(0)));
    assert_eq!(dead[0].1.get("x-last-error"), Some(&json!("attempt 1 failed")));
    assert_eq!(dead[0].1.get("x-original-topic"), Some(&json!(TOPIC)));
    assert_eq!(consumer.stats().dead_lettered, 1);
}

#[tokio::test]
async fn test_dead_letter_failure_blocks_ack_and_report() {
    let transport = MemoryTransport::new();
    seed(&transport, 0).await;
    transport.fail_next_publishes(1);
    let sink = Arc::new(MemorySink::new());
    let policy = RetryPolicy::default()
        .with_max_retries(0)
        .with_dead_letter_topic("email_queue.dead");
    let consumer =
        consumer_with(&transport, MockAction::failing(1), policy).with_failure_sink(sink.clone());

    assert!(consumer.process_next().await.is_err());
    assert_eq!(transport.ack_count(), 0);
    assert!(sink.reports().is_empty());
    assert_eq!(transport.queued(TOPIC).len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_attempt_timeout_consumes_a_retry() {
    let transport = MemoryTransport::new();
    seed(&transport, 0).await;
    let policy = RetryPolicy::default().with_attempt_timeout(Duration::from_secs(1));
    let action = MockAction::failing(0).with_delay(Duration::from_secs(60));
    let consumer = consumer_with(&transport, action, policy);

    let report = consumer.process_next().await.unwrap().unwrap();

    assert_eq!(report.outcome, Outcome::Retried);
    assert_eq!(report.error.as_deref(), Some("attempt timed out after 1s"));
    assert!(report.duration >= Duration::from_secs(1));
    assert!(report.duration < Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn test_retry_delay_is_applied_before_republish() {
    let transport = MemoryTransport::new();
    seed(&transport, 0).await;
    let policy = RetryPolicy::default().with_retry_delay(Duration::from_secs(5));
    let consumer = consumer_with(&transport, MockAction::failing(1), policy);

    let started = tokio::time::Instant::now();
    let report = consumer.process_next().await.unwrap().unwrap();

    assert_eq!(report.outcome, Outcome::Retried);
    assert!(started.elapsed() >= Duration::from_secs(5));
    // The delay is not part of the measured action time.
    assert!(report.duration < Duration::from_secs(5));
}

#[tokio::test(start_paused = true)]
async fn test_duration_measured_for_every_outcome() {
    let transport = MemoryTransport::new();
    seed(&transport, 0).await;
    seed(&transport, 0).await;
    let action = MockAction::failing(1).with_delay(Duration::from_secs(4));
    let consumer = consumer_with(&transport, action, RetryPolicy::default());

    let failed = consumer.process_next().await.unwrap().unwrap();
    let succeeded = consumer.process_next().await.unwrap().unwrap();

    assert_eq!(failed.outcome, Outcome::Retried);
    assert_eq!(succeeded.outcome, Outcome::Succeeded);
    assert!(failed.duration >= Duration::from_secs(4));
    assert!(succeeded.duration >= Duration::from_secs(4));
    assert!(consumer.stats().processing_time >= Duration::from_secs(8));
}

#[tokio::test]
async fn test_empty_topic_yields_none() {
    let transport = MemoryTransport::new();
    let consumer = consumer_with(&transport, MockAction::failing(0), RetryPolicy::default());

    assert!(consumer.process_next().await.unwrap().is_none());
    assert_eq!(consumer.stats(), ConsumerStats::default());
}

// Records how many executions overlap
#[derive(Default)]
struct OverlapAction {
    running: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl Action for OverlapAction {
    async fn execute(&self, _payload: &[u8]) -> Result<(), ActionError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(())
    }
}

fn overlap_consumer(transport: &MemoryTransport, action: Arc<OverlapAction>) -> Consumer {
    Consumer::new(
        Arc::new(transport.clone()),
        action,
        ConsumerOptions::new(TOPIC),
    )
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_process_next_holds_one_delivery() {
    let transport = MemoryTransport::new();
    seed(&transport, 0).await;
    seed(&transport, 0).await;
    let action = Arc::new(OverlapAction::default());
    let consumer = overlap_consumer(&transport, action.clone());

    let (first, second) = tokio::join!(consumer.process_next(), consumer.process_next());

    assert_eq!(first.unwrap().unwrap().outcome, Outcome::Succeeded);
    assert_eq!(second.unwrap().unwrap().outcome, Outcome::Succeeded);
    assert_eq!(action.peak.load(Ordering::SeqCst), 1);
    assert_eq!(transport.in_flight(), 0);
    assert_eq!(consumer.stats().succeeded, 2);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_handle_delivery_runs_one_at_a_time() {
    let transport = MemoryTransport::new();
    seed(&transport, 0).await;
    seed(&transport, 0).await;
    let first = transport.receive(TOPIC).await.unwrap().unwrap();
    let second = transport.receive(TOPIC).await.unwrap().unwrap();
    let action = Arc::new(OverlapAction::default());
    let consumer = overlap_consumer(&transport, action.clone());

    let (a, b) = tokio::join!(consumer.handle_delivery(first), consumer.handle_delivery(second));

    tokio_test::assert_ok!(a);
    tokio_test::assert_ok!(b);
    assert_eq!(action.peak.load(Ordering::SeqCst), 1);
}

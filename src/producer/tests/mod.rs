use super::*;
use crate::transport::{MemoryTransport, TransportCall, RETRY_COUNT_ATTRIBUTE};
use std::time::Duration;

const TOPIC: &str = "email_queue";

fn enqueuer(transport: &MemoryTransport) -> TaskEnqueuer {
    TaskEnqueuer::new(Arc::new(transport.clone()), TOPIC)
}

#[tokio::test]
async fn test_fresh_task_has_no_retry_attribute() {
    let transport = MemoryTransport::new();
    enqueuer(&transport).enqueue(b"fresh").await.unwrap();
    enqueuer(&transport)
        .enqueue_with_retry_count(b"again", 2)
        .await
        .unwrap();

    let queued = transport.queued(TOPIC);
    assert!(queued[0].1.get(RETRY_COUNT_ATTRIBUTE).is_none());
    assert_eq!(
        queued[1].1.get(RETRY_COUNT_ATTRIBUTE),
        Some(&serde_json::json!(2))
    );
    assert!(transport
        .calls()
        .iter()
        .all(|call| matches!(call, TransportCall::Publish { durable: true, .. })));
}

#[tokio::test(start_paused = true)]
async fn test_enqueue_orders_publishes_in_order_and_closes() {
    let transport = MemoryTransport::new();
    let started = tokio::time::Instant::now();

    let queued = enqueuer(&transport)
        .enqueue_orders(10..13, Duration::from_secs(2))
        .await
        .unwrap();

    assert_eq!(queued, 3);
    assert!(started.elapsed() >= Duration::from_secs(6));
    assert!(transport.is_closed());
    let orders: Vec<OrderMessage> = transport
        .queued(TOPIC)
        .iter()
        .map(|(payload, _)| serde_json::from_slice(payload).unwrap())
        .collect();
    assert_eq!(
        orders,
        vec![
            OrderMessage { order_id: 10 },
            OrderMessage { order_id: 11 },
            OrderMessage { order_id: 12 }
        ]
    );
}

#[tokio::test]
async fn test_enqueue_orders_closes_transport_when_publish_fails() {
    let transport = MemoryTransport::new();
    transport.fail_next_publishes(1);

    let err = enqueuer(&transport)
        .enqueue_orders(1..4, Duration::ZERO)
        .await
        .unwrap_err();

    assert!(matches!(err, TransportError::Unavailable(_)));
    assert!(transport.is_closed());
    assert!(transport.queued(TOPIC).is_empty());
}

#[test]
fn test_order_message_wire_format() {
    let encoded = serde_json::to_string(&OrderMessage { order_id: 42 }).unwrap();
    assert_eq!(encoded, r#"{"orderId":42}"#);
}

use super::*;
use serde_json::json;

fn attributes(value: Value) -> Attributes {
    let mut attributes = Attributes::new();
    attributes.insert(RETRY_COUNT_ATTRIBUTE.to_string(), value);
    attributes
}

#[test]
fn test_missing_retry_count_defaults_to_zero() {
    assert_eq!(retry_count(&Attributes::new()), 0);
}

#[test]
fn test_retry_count_accepts_numbers_and_numeric_strings() {
    assert_eq!(retry_count(&attributes(json!(2))), 2);
    assert_eq!(retry_count(&attributes(json!("3"))), 3);
}

#[test]
fn test_malformed_retry_count_reads_as_zero() {
    assert_eq!(retry_count(&attributes(json!(-1))), 0);
    assert_eq!(retry_count(&attributes(json!(1.5))), 0);
    assert_eq!(retry_count(&attributes(json!("soon"))), 0);
    assert_eq!(retry_count(&attributes(json!(null))), 0);
}

#[test]
fn test_oversized_retry_count_saturates() {
    assert_eq!(retry_count(&attributes(json!(u64::MAX))), u32::MAX);
}

#[tokio::test]
async fn test_memory_transport_hands_out_each_message_once() {
    let transport = MemoryTransport::new();
    transport
        .publish("orders", b"a", &Attributes::new(), true)
        .await
        .unwrap();
    transport
        .publish("orders", b"b", &retry_attributes(1), true)
        .await
        .unwrap();

    let first = transport.receive("orders").await.unwrap().unwrap();
    let second = transport.receive("orders").await.unwrap().unwrap();
    assert_eq!(first.payload, b"a");
    assert_eq!(second.payload, b"b");
    assert_eq!(second.retry_count(), 1);
    assert_ne!(first.tag, second.tag);
    assert!(transport.receive("orders").await.unwrap().is_none());
    assert_eq!(transport.in_flight(), 2);
}

#[tokio::test]
async fn test_memory_transport_ack_and_nack() {
    let transport = MemoryTransport::new();
    transport
        .publish("orders", b"a", &Attributes::new(), true)
        .await
        .unwrap();

    let delivery = transport.receive("orders").await.unwrap().unwrap();
    transport.nack(&delivery, true).await.unwrap();
    assert_eq!(transport.queued("orders").len(), 1);

    let redelivered = transport.receive("orders").await.unwrap().unwrap();
    assert_eq!(redelivered.payload, b"a");
    transport.ack(&redelivered).await.unwrap();
    assert!(transport.queued("orders").is_empty());
    assert_eq!(transport.in_flight(), 0);

    // Settling twice is rejected.
    let err = transport.ack(&redelivered).await.unwrap_err();
    assert!(matches!(err, TransportError::UnknownDelivery(tag) if tag == redelivered.tag));
}

#[tokio::test]
async fn test_memory_transport_injected_failures() {
    let transport = MemoryTransport::new();
    transport.fail_next_publishes(1);

    let err = transport
        .publish("orders", b"a", &Attributes::new(), true)
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Unavailable(_)));
    tokio_test::assert_ok!(
        transport
            .publish("orders", b"a", &Attributes::new(), true)
            .await
    );

    transport.fail_next_acks(1);
    let delivery = transport.receive("orders").await.unwrap().unwrap();
    assert!(transport.ack(&delivery).await.is_err());
    tokio_test::assert_ok!(transport.ack(&delivery).await);
    assert_eq!(transport.publish_count(), 1);
    assert_eq!(transport.ack_count(), 1);
}

#[tokio::test]
async fn test_memory_transport_close_returns_unsettled_deliveries() {
    let transport = MemoryTransport::new();
    for payload in [b"a", b"b", b"c"] {
        transport
            .publish("orders", payload, &Attributes::new(), true)
            .await
            .unwrap();
    }
    let _a = transport.receive("orders").await.unwrap().unwrap();
    let _b = transport.receive("orders").await.unwrap().unwrap();

    transport.close().await.unwrap();

    assert!(transport.is_closed());
    let queued: Vec<Vec<u8>> = transport
        .queued("orders")
        .into_iter()
        .map(|(payload, _)| payload)
        .collect();
    assert_eq!(queued, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
    assert!(matches!(
        transport.receive("orders").await,
        Err(TransportError::Closed)
    ));
}

//! # Retry Worker
//!
//! An at-least-once queue consumer that retries failed work by re-publishing
//! it with an incremented retry counter, up to a bounded number of retries.
//!
//! ## Features
//!
//! - One delivery in flight per consumer (prefetch 1)
//! - Retry via re-publish, carried in the `x-retry-count` attribute
//! - Re-publish always happens before the original is acknowledged
//! - Optional retry delay, per-attempt timeout and dead-letter topic
//! - In-memory and SQLite queue transports
//!
//! ## Example
//!
//! ```rust
//! use retry_worker::transport::MemoryTransport;
//! use retry_worker::{Action, ActionError, Consumer, ConsumerOptions, Outcome, TaskEnqueuer};
//! use std::sync::Arc;
//!
//! struct SendEmail;
//!
//! #[async_trait::async_trait]
//! impl Action for SendEmail {
//!     async fn execute(&self, payload: &[u8]) -> Result<(), ActionError> {
//!         println!("Sending {}", String::from_utf8_lossy(payload));
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let transport = Arc::new(MemoryTransport::new());
//!     let enqueuer = TaskEnqueuer::new(transport.clone(), "email_queue");
//!     enqueuer.enqueue(br#"{"orderId":42}"#).await.unwrap();
//!
//!     let consumer = Consumer::new(transport, Arc::new(SendEmail), ConsumerOptions::new("email_queue"));
//!     let report = consumer.process_next().await.unwrap().unwrap();
//!     assert_eq!(report.outcome, Outcome::Succeeded);
//! }
//! ```

pub mod config;
pub mod consumer;
pub mod error;
pub mod producer;
pub mod task;
pub mod transport;

pub use config::{ConfigError, WorkerConfig};
pub use consumer::{AckDecision, Consumer, ConsumerOptions, ConsumerStats, DeliveryReport, Outcome};
pub use error::{ActionError, TransportError};
pub use producer::{OrderMessage, TaskEnqueuer};
pub use task::{Action, RetryPolicy, Task};
pub use transport::{Delivery, QueueTransport};

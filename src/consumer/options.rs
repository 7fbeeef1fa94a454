use std::time::Duration;

use crate::task::RetryPolicy;

/// Deliveries a consumer holds at once. Fixed: retries of a task must not
/// overtake each other within one consumer.
pub const PREFETCH: usize = 1;

pub const DEFAULT_TOPIC: &str = "email_queue";

#[derive(Debug, Clone, PartialEq)]
pub struct ConsumerOptions {
    /// Topic deliveries are pulled from and retries are published to
    pub topic: String,
    pub retry_policy: RetryPolicy,
    /// Wait between receive attempts while the topic is empty
    pub poll_interval: Duration,
}

impl Default for ConsumerOptions {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            retry_policy: RetryPolicy::default(),
            poll_interval: Duration::from_millis(100),
        }
    }
}

impl ConsumerOptions {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            ..Self::default()
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_poll_interval(mut self, value: Duration) -> Self {
        self.poll_interval = value;
        self
    }
}

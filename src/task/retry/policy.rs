use std::time::Duration;

pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// How often a failed task is re-published and what happens once it is not.
///
/// The defaults re-queue immediately, never time an attempt out and drop
/// exhausted tasks after reporting them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    /// Pause before a failed task is re-published
    pub retry_delay: Duration,
    /// Upper bound for a single action attempt
    pub attempt_timeout: Option<Duration>,
    /// Topic that receives exhausted payloads
    pub dead_letter_topic: Option<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::ZERO,
            attempt_timeout: None,
            dead_letter_topic: None,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, retry_delay: Duration) -> Self {
        Self {
            max_retries,
            retry_delay,
            ..Self::default()
        }
    }

    pub fn with_max_retries(mut self, value: u32) -> Self {
        self.max_retries = value;
        self
    }

    pub fn with_retry_delay(mut self, value: Duration) -> Self {
        self.retry_delay = value;
        self
    }

    pub fn with_attempt_timeout(mut self, value: Duration) -> Self {
        self.attempt_timeout = Some(value);
        self
    }

    pub fn with_dead_letter_topic(mut self, topic: impl Into<String>) -> Self {
        self.dead_letter_topic = Some(topic.into());
        self
    }

    /// Whether a task that failed with `retry_count` earlier retries gets another copy.
    pub fn should_retry(&self, retry_count: u32) -> bool {
        retry_count < self.max_retries
    }
}

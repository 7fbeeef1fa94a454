use std::time::Duration;

use thiserror::Error;

use crate::consumer::{ConsumerOptions, DEFAULT_TOPIC};
use crate::task::retry::DEFAULT_MAX_RETRIES;
use crate::task::RetryPolicy;

pub const DATABASE_URL_VAR: &str = "RETRY_WORKER_DATABASE_URL";
pub const TOPIC_VAR: &str = "RETRY_WORKER_TOPIC";
pub const MAX_RETRIES_VAR: &str = "RETRY_WORKER_MAX_RETRIES";
pub const RETRY_DELAY_MS_VAR: &str = "RETRY_WORKER_RETRY_DELAY_MS";
pub const ATTEMPT_TIMEOUT_MS_VAR: &str = "RETRY_WORKER_ATTEMPT_TIMEOUT_MS";
pub const DEAD_LETTER_TOPIC_VAR: &str = "RETRY_WORKER_DEAD_LETTER_TOPIC";
pub const POLL_INTERVAL_MS_VAR: &str = "RETRY_WORKER_POLL_INTERVAL_MS";
pub const CLAIM_LEASE_MS_VAR: &str = "RETRY_WORKER_CLAIM_LEASE_MS";

/// Age after which another worker's unsettled claim counts as abandoned.
pub const DEFAULT_CLAIM_LEASE: Duration = Duration::from_secs(300);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be a non-negative integer, got '{value}'")]
    InvalidNumber { name: &'static str, value: String },
}

/// Settings of the `retry-worker` process.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    pub database_url: String,
    pub topic: String,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub attempt_timeout: Option<Duration>,
    pub dead_letter_topic: Option<String>,
    pub poll_interval: Duration,
    /// Only claims older than this are recovered at startup; keep it above
    /// the longest attempt.
    pub claim_lease: Duration,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            database_url: "sqlite:retry-worker.db".to_string(),
            topic: DEFAULT_TOPIC.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: Duration::ZERO,
            attempt_timeout: None,
            dead_letter_topic: None,
            poll_interval: Duration::from_millis(100),
            claim_lease: DEFAULT_CLAIM_LEASE,
        }
    }
}

impl WorkerConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any variable source. Unset and empty
    /// variables keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());
        let mut config = Self::default();

        if let Some(url) = var(DATABASE_URL_VAR) {
            config.database_url = url;
        }
        if let Some(topic) = var(TOPIC_VAR) {
            config.topic = topic;
        }
        if let Some(value) = var(MAX_RETRIES_VAR) {
            config.max_retries = parse_number(MAX_RETRIES_VAR, &value)?;
        }
        if let Some(value) = var(RETRY_DELAY_MS_VAR) {
            config.retry_delay = Duration::from_millis(parse_number(RETRY_DELAY_MS_VAR, &value)?);
        }
        if let Some(value) = var(ATTEMPT_TIMEOUT_MS_VAR) {
            config.attempt_timeout = Some(Duration::from_millis(parse_number(
                ATTEMPT_TIMEOUT_MS_VAR,
                &value,
            )?));
        }
        config.dead_letter_topic = var(DEAD_LETTER_TOPIC_VAR);
        if let Some(value) = var(POLL_INTERVAL_MS_VAR) {
            config.poll_interval =
                Duration::from_millis(parse_number(POLL_INTERVAL_MS_VAR, &value)?);
        }
        if let Some(value) = var(CLAIM_LEASE_MS_VAR) {
            config.claim_lease =
                Duration::from_millis(parse_number(CLAIM_LEASE_MS_VAR, &value)?);
        }

        Ok(config)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        let mut policy = RetryPolicy::new(self.max_retries, self.retry_delay);
        policy.attempt_timeout = self.attempt_timeout;
        policy.dead_letter_topic = self.dead_letter_topic.clone();
        policy
    }

    pub fn consumer_options(&self) -> ConsumerOptions {
        ConsumerOptions::new(self.topic.clone())
            .with_retry_policy(self.retry_policy())
            .with_poll_interval(self.poll_interval)
    }
}

fn parse_number<T: std::str::FromStr>(name: &'static str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidNumber {
            name,
            value: value.to_string(),
        })
}

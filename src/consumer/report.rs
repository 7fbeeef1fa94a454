use std::borrow::Cow;
use std::time::Duration;

use super::outcome::Outcome;

/// Observability record for one processed delivery.
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryReport {
    pub topic: String,
    pub outcome: Outcome,
    /// Retry count of the delivery the decision was made for
    pub retry_count: u32,
    /// Wall-clock time spent in the action
    pub duration: Duration,
    /// Error of the failed attempt, if it failed
    pub error: Option<String>,
    pub dead_lettered: bool,
}

/// Terminal failure of a task that used up all of its retries.
#[derive(Debug, Clone, PartialEq)]
pub struct ExhaustedReport {
    pub topic: String,
    pub payload: Vec<u8>,
    pub retry_count: u32,
    pub error: String,
}

impl ExhaustedReport {
    pub fn payload_lossy(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.payload)
    }
}

/// Running totals for a consumer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub succeeded: u64,
    pub retried: u64,
    pub exhausted: u64,
    pub dead_lettered: u64,
    pub processing_time: Duration,
}

impl ConsumerStats {
    pub fn processed(&self) -> u64 {
        self.succeeded + self.retried + self.exhausted
    }

    pub(crate) fn record(&mut self, report: &DeliveryReport) {
        match report.outcome {
            Outcome::Succeeded => self.succeeded += 1,
            Outcome::Retried => self.retried += 1,
            Outcome::Exhausted => self.exhausted += 1,
        }
        if report.dead_lettered {
            self.dead_lettered += 1;
        }
        self.processing_time += report.duration;
    }
}

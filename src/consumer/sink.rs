use async_trait::async_trait;
use log::error;
use std::sync::{Arc, Mutex, PoisonError};

use super::report::ExhaustedReport;

/// Receives one report per task that exhausted its retries.
#[async_trait]
pub trait FailureSink: Send + Sync {
    async fn report(&self, report: &ExhaustedReport);
}

/// Writes exhausted tasks to the error log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

#[async_trait]
impl FailureSink for LogSink {
    async fn report(&self, report: &ExhaustedReport) {
        error!(
            "Giving up on task from '{}' after {} retries: {} (payload: {})",
            report.topic,
            report.retry_count,
            report.error,
            report.payload_lossy()
        );
    }
}

/// Keeps exhausted reports in memory for inspection
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    reports: Arc<Mutex<Vec<ExhaustedReport>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reports(&self) -> Vec<ExhaustedReport> {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl FailureSink for MemorySink {
    async fn report(&self, report: &ExhaustedReport) {
        self.reports
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(report.clone());
    }
}

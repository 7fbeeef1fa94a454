use async_trait::async_trait;
use log::{info, warn};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::error::ActionError;
use crate::producer::OrderMessage;
use crate::task::Action;

/// Sends the confirmation email for an order.
///
/// Delivery is simulated with a fixed latency. Failures are injected
/// deterministically (the first `fail_first` attempts fail) and, after
/// those, at random with probability `failure_rate`.
pub struct SendOrderEmail {
    latency: Duration,
    failures_left: AtomicUsize,
    failure_rate: f64,
}

impl SendOrderEmail {
    pub fn new(latency: Duration) -> Self {
        Self {
            latency,
            failures_left: AtomicUsize::new(0),
            failure_rate: 0.0,
        }
    }

    pub fn failing_first(self, attempts: usize) -> Self {
        self.failures_left.store(attempts, Ordering::SeqCst);
        self
    }

    /// Fails each attempt with probability `rate`, clamped to `0.0..=1.0`.
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = if rate.is_nan() { 0.0 } else { rate.clamp(0.0, 1.0) };
        self
    }

    pub fn failure_rate(&self) -> f64 {
        self.failure_rate
    }

    fn roll_failure(&self) -> bool {
        self.failure_rate > 0.0 && rand::random::<f64>() < self.failure_rate
    }

    fn take_failure(&self) -> bool {
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Action for SendOrderEmail {
    async fn execute(&self, payload: &[u8]) -> Result<(), ActionError> {
        let order: OrderMessage = serde_json::from_slice(payload)?;
        info!("Sending email for order {}", order.order_id);

        tokio::time::sleep(self.latency).await;

        if self.take_failure() || self.roll_failure() {
            warn!("Email for order {} bounced", order.order_id);
            return Err(format!("email for order {} was not delivered", order.order_id).into());
        }
        info!("Email for order {} sent", order.order_id);
        Ok(())
    }
}

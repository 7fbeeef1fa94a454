use std::time::Duration;
use tokio::time::{timeout, Instant};

use crate::error::ActionError;
use crate::task::Action;

pub(crate) struct Attempt {
    pub result: Result<(), ActionError>,
    pub duration: Duration,
}

/// Runs the action once and measures it, whatever the result.
pub(crate) async fn run_attempt(
    action: &dyn Action,
    payload: &[u8],
    limit: Option<Duration>,
) -> Attempt {
    let started = Instant::now();
    let result = match limit {
        Some(limit) => match timeout(limit, action.execute(payload)).await {
            Ok(result) => result,
            Err(_) => Err(ActionError::TimedOut(limit)),
        },
        None => action.execute(payload).await,
    };

    Attempt {
        result,
        duration: started.elapsed(),
    }
}

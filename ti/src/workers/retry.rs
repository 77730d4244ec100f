//! Exponential backoff retry

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

/// Attempt budget and backoff base for one operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    /// Wait after failed attempt `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << exp)
    }
}

/// Run `op` until it succeeds or `max_retries + 1` attempts have failed
///
/// `op` receives the 1-based attempt number. The last error is returned.
pub async fn retry_operation<T, E, F, Fut>(policy: &RetryPolicy, label: &str, mut op: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
{
    let mut attempt = 1;
    loop {
        match op(attempt).await {
            Ok(value) => {
                if attempt > 1 {
                    debug!(%label, attempt, "retry_operation: succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if attempt > policy.max_retries => {
                warn!(%label, attempts = attempt, error = %e, "retry_operation: giving up");
                return Err(e);
            }
            Err(e) => {
                let delay = policy.delay_for(attempt);
                warn!(%label, attempt, ?delay, error = %e, "retry_operation: attempt failed, backing off");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

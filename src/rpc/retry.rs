//! Deadlines and linear retry for RPC calls

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use tracing::debug;

use crate::error::{Error, Result};

/// Linear backoff: wait `attempt * step` after each failed attempt,
/// giving up once `max_attempts` attempts have been made.
#[derive(Debug, Clone)]
pub struct LinearBackoff {
    step: Duration,
    max_attempts: u32,
    attempt: u32,
}

impl LinearBackoff {
    pub fn new(step: Duration, max_attempts: u32) -> Self {
        Self {
            step,
            max_attempts: max_attempts.max(1),
            attempt: 0,
        }
    }
}

impl Backoff for LinearBackoff {
    fn reset(&mut self) {
        self.attempt = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        self.attempt += 1;
        if self.attempt >= self.max_attempts {
            None
        } else {
            Some(self.step * self.attempt)
        }
    }
}

/// Run `fut` with a hard deadline. An elapsed deadline drops the future.
pub async fn with_deadline<T, F>(deadline: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(deadline, fut).await {
        Ok(result) => result,
        Err(_) => Err(Error::RpcTimeout(deadline.as_millis() as u64)),
    }
}

/// Retry `op` under `policy`, bounding each attempt by `deadline`.
///
/// Transient errors are retried; permanent ones return immediately.
pub async fn retry_linear<T, F, Fut>(
    policy: LinearBackoff,
    deadline: Duration,
    label: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    backoff::future::retry_notify(
        policy,
        || {
            let attempt = op();
            async move {
                match with_deadline(deadline, attempt).await {
                    Ok(value) => Ok(value),
                    Err(e) if e.is_retryable() => Err(backoff::Error::transient(e)),
                    Err(e) => Err(backoff::Error::permanent(e)),
                }
            }
        },
        |e: Error, wait: Duration| {
            debug!("{} failed ({}), retrying in {:?}", label, e, wait);
        },
    )
    .await
}

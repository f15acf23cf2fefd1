//! Bounded exponential backoff for transient faults on outbound calls.
//!
//! Retries live here, inside the client layer; agents never observe them.

use std::future::Future;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::error::Result;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        // 3 attempts with 2s, 4s, 8s waits between them
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * 2u32.saturating_pow(attempt.saturating_sub(1))
    }
}

/// Run `op`, retrying transient failures per `policy`. Every attempt emits a
/// structured call record `{service, op, latency, outcome}`.
pub async fn with_retries<T, F, Fut>(
    service: &str,
    op: &str,
    policy: RetryPolicy,
    mut call: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        let started = Instant::now();
        match call().await {
            Ok(value) => {
                debug!(
                    service,
                    op,
                    latency_ms = started.elapsed().as_millis() as u64,
                    outcome = "ok",
                    attempt,
                    "outbound call"
                );
                return Ok(value);
            }
            Err(err) => {
                let latency_ms = started.elapsed().as_millis() as u64;
                if err.is_transient() && attempt < policy.max_attempts {
                    let delay = policy.delay_for(attempt);
                    warn!(
                        service,
                        op,
                        latency_ms,
                        outcome = "retry",
                        attempt,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "transient failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                    continue;
                }
                warn!(
                    service,
                    op,
                    latency_ms,
                    outcome = "error",
                    attempt,
                    error = %err,
                    "outbound call failed"
                );
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CoreError;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_retries("test", "op", RetryPolicy::default(), || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(CoreError::RateLimited("slow down".into()))
                } else {
                    Ok(42)
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_transient_fails_immediately() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_retries("test", "op", RetryPolicy::default(), || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(CoreError::Auth("bad token".into())) }
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for(3), Duration::from_secs(8));
    }
}

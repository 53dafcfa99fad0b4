//! Bounded exponential backoff for idempotent backend calls
//!
//! Only transient network failures are retried, and only for tools declared
//! read-only. Application-level errors from a reachable backend are returned
//! immediately.

use std::future::Future;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::Config;
use crate::errors::TransportError;

use super::transport::JsonRpcResponse;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries beyond the first attempt.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub backoff_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            backoff_factor: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            max_retries: config.retry_max_attempts,
            initial_delay: config.retry_initial_delay,
            max_delay: config.retry_max_delay,
            backoff_factor: config.retry_backoff_factor,
        }
    }

    /// Run `operation`, retrying transient failures when `idempotent` is
    /// true. Non-idempotent operations execute exactly once and their outcome
    /// propagates unchanged.
    pub async fn run<F, Fut>(
        &self,
        idempotent: bool,
        mut operation: F,
    ) -> Result<JsonRpcResponse, TransportError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<JsonRpcResponse, TransportError>>,
    {
        if !idempotent {
            return operation().await;
        }

        let mut delay = self.initial_delay;
        let mut attempt: u32 = 0;
        loop {
            match operation().await {
                Ok(response) => {
                    if attempt > 0 {
                        info!(attempt = attempt + 1, "call succeeded after retry");
                    }
                    return Ok(response);
                }
                Err(err) if err.is_transient() && attempt < self.max_retries => {
                    let wait = delay.min(self.max_delay);
                    warn!(
                        attempt = attempt + 1,
                        total = self.max_retries + 1,
                        wait_ms = wait.as_millis() as u64,
                        error = %err,
                        "transient backend error, retrying"
                    );
                    tokio::time::sleep(wait).await;
                    delay = delay.mul_f64(self.backoff_factor);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use serde_json::json;

    use super::*;

    fn fail_n_then_succeed(
        failures: usize,
        make_error: fn() -> TransportError,
    ) -> (
        Arc<AtomicUsize>,
        impl FnMut() -> std::pin::Pin<
            Box<dyn Future<Output = Result<JsonRpcResponse, TransportError>> + Send>,
        >,
    ) {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let operation = move || {
            let counter = Arc::clone(&counter);
            Box::pin(async move {
                let attempt = counter.fetch_add(1, Ordering::SeqCst);
                if attempt < failures {
                    Err(make_error())
                } else {
                    Ok(JsonRpcResponse::Result(json!({"ok": true})))
                }
            })
                as std::pin::Pin<
                    Box<dyn Future<Output = Result<JsonRpcResponse, TransportError>> + Send>,
                >
        };
        (calls, operation)
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
            backoff_factor: 2.0,
        }
    }

    #[tokio::test]
    async fn idempotent_operation_retries_transient_failures() {
        let (calls, operation) = fail_n_then_succeed(2, || TransportError::ConnectTimeout {
            message: "slow".to_string(),
        });

        let result = fast_policy().run(true, operation).await;
        assert!(result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn non_idempotent_operation_runs_once() {
        let (calls, operation) = fail_n_then_succeed(2, || TransportError::ConnectTimeout {
            message: "slow".to_string(),
        });

        let result = fast_policy().run(false, operation).await;
        assert!(matches!(result, Err(TransportError::ConnectTimeout { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn non_transient_failure_is_not_retried() {
        let (calls, operation) = fail_n_then_succeed(2, || TransportError::MalformedResponse {
            reason: "garbage".to_string(),
        });

        let result = fast_policy().run(true, operation).await;
        assert!(matches!(
            result,
            Err(TransportError::MalformedResponse { .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_are_bounded() {
        let (calls, operation) = fail_n_then_succeed(10, || TransportError::ConnectRefused {
            message: "down".to_string(),
        });

        let result = fast_policy().run(true, operation).await;
        assert!(matches!(result, Err(TransportError::ConnectRefused { .. })));
        // One initial attempt plus max_retries.
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn backoff_doubles_and_caps_at_max_delay() {
        let policy = RetryPolicy {
            max_retries: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(1500),
            backoff_factor: 2.0,
        };
        let (_, operation) = fail_n_then_succeed(10, || TransportError::ConnectTimeout {
            message: "slow".to_string(),
        });

        let started = tokio::time::Instant::now();
        let _ = policy.run(true, operation).await;
        // Delays: 500ms, 1000ms, then capped at 1500ms.
        assert_eq!(started.elapsed(), Duration::from_millis(3000));
    }
}

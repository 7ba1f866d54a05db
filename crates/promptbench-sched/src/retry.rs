//! Retry/backoff execution of a single generation call.
//!
//! Wraps one provider call in a bounded retry loop with exponential
//! backoff and jitter. Rate-limit failures are not retried here: they
//! abort immediately so the run loop can release the row and open a
//! global pause window, without consuming the row's retry budget.

use std::time::Duration;

use promptbench_provider::classify::{classify, ErrorMeta};
use promptbench_provider::{GenerateRequest, GenerationProvider, TokenUsage};
use tokio::time::Instant;
use tracing::debug;

/// Retry loop parameters.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Retries allowed beyond the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry; doubles per attempt.
    pub base_delay: Duration,
    /// Ceiling on the computed delay, before jitter.
    pub max_delay: Duration,
    /// Fraction of the delay added as random jitter (0.2 = up to +20%).
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 4,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter: 0.2,
        }
    }
}

impl RetryConfig {
    /// Deterministic backoff for a zero-based failed attempt number,
    /// before jitter: `min(base * 2^attempt, max)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

/// Outcome of a successful execution.
#[derive(Debug, Clone)]
pub struct Execution {
    pub text: String,
    pub usage: TokenUsage,
    /// Retries it took beyond the first attempt.
    pub retries: u32,
    /// Wall time across all attempts, backoff included.
    pub latency: Duration,
}

/// Why an execution did not produce output.
#[derive(Debug)]
pub enum ExecutionError {
    /// The provider rate-limited us. The caller should release the row
    /// and pause the whole job; the row's retry budget is untouched.
    RateLimitPause(ErrorMeta),
    /// Non-retryable failure, or the retry budget ran out.
    Failed { meta: ErrorMeta, retries: u32 },
}

/// Notification passed to the retry callback before each backoff sleep.
#[derive(Debug, Clone)]
pub struct RetryNotice {
    /// One-based count of retries about to be taken.
    pub attempt: u32,
    pub delay: Duration,
    pub meta: ErrorMeta,
}

/// Run one generation request through the retry loop.
///
/// `on_retry` is invoked before each backoff sleep so the caller can
/// persist the updated retry count; it must not fail (persist
/// best-effort and log inside the callback).
pub async fn execute_with_retry<P, N, NFut>(
    provider: &P,
    request: &GenerateRequest,
    config: &RetryConfig,
    mut on_retry: N,
) -> Result<Execution, ExecutionError>
where
    P: GenerationProvider + ?Sized,
    N: FnMut(RetryNotice) -> NFut,
    NFut: Future<Output = ()>,
{
    let started = Instant::now();
    let mut attempt: u32 = 0;
    loop {
        match provider.generate(request).await {
            Ok(response) => {
                return Ok(Execution {
                    text: response.text,
                    usage: response.usage,
                    retries: attempt,
                    latency: started.elapsed(),
                });
            }
            Err(err) => {
                let meta = classify(&err);
                if meta.rate_limited {
                    return Err(ExecutionError::RateLimitPause(meta));
                }
                if !meta.retryable || attempt >= config.max_retries {
                    return Err(ExecutionError::Failed {
                        meta,
                        retries: attempt,
                    });
                }
                let base = config.delay_for(attempt);
                let delay = base + base.mul_f64(rand::random::<f64>() * config.jitter);
                attempt += 1;
                debug!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    kind = meta.kind.as_str(),
                    "retrying after transient failure"
                );
                on_retry(RetryNotice {
                    attempt,
                    delay,
                    meta,
                })
                .await;
                tokio::time::sleep(delay).await;
            }
        }
    }
}

//! Bounded exponential-backoff retry around a single provider call.

use std::future::Future;

use futures::FutureExt;
use tokio::time::Duration;

use crate::error::ProviderError;

/// Retry policy for one provider call.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before retry `n` is `backoff_factor^n` seconds.
    pub backoff_factor: f64,
    /// Upper bound for a single backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_factor: 2.0,
            max_delay: Duration::from_secs(60),
        }
    }
}

/// A value produced after `retries` failed attempts.
#[derive(Debug)]
pub struct Retried<T> {
    pub value: T,
    pub retries: u32,
}

/// The final error once retrying stops.
#[derive(Debug)]
pub struct RetryFailure {
    pub error: ProviderError,
    pub retries: u32,
    /// Retrying stopped early because the caller asked it to.
    pub abandoned: bool,
}

/// Passed to the retry callback before each backoff sleep.
#[derive(Debug)]
pub struct RetryNotice<'a> {
    /// 1-based retry number
    pub attempt: u32,
    pub error: &'a ProviderError,
    pub delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_factor: f64) -> Self {
        Self {
            max_retries,
            backoff_factor,
            ..Self::default()
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Backoff before retry `attempt` (1-based), capped at `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.backoff_factor.max(0.0).powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            self.max_delay
        } else {
            Duration::from_secs_f64(secs)
        }
    }

    /// Run `op`, retrying retryable failures.
    ///
    /// Non-retryable errors are returned immediately. `on_retry` is called
    /// once per scheduled retry, before the backoff sleep.
    pub async fn execute<T, F, Fut>(
        &self,
        op: F,
        on_retry: impl FnMut(&RetryNotice<'_>),
    ) -> Result<Retried<T>, RetryFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        self.execute_until(op, on_retry, std::future::pending()).await
    }

    /// Like [`execute`](Self::execute), but no further attempt starts once
    /// `stop` has resolved. An attempt already running is not interrupted;
    /// a pending backoff is cut short and the last error is returned with
    /// `abandoned` set.
    pub async fn execute_until<T, F, Fut>(
        &self,
        mut op: F,
        mut on_retry: impl FnMut(&RetryNotice<'_>),
        stop: impl Future<Output = ()>,
    ) -> Result<Retried<T>, RetryFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let mut stop = std::pin::pin!(stop);
        let mut retries = 0;
        loop {
            let error = match op().await {
                Ok(value) => return Ok(Retried { value, retries }),
                Err(error) if error.is_retryable() && retries < self.max_retries => error,
                Err(error) => {
                    return Err(RetryFailure {
                        error,
                        retries,
                        abandoned: false,
                    });
                }
            };
            if stop.as_mut().now_or_never().is_some() {
                return Err(RetryFailure {
                    error,
                    retries,
                    abandoned: true,
                });
            }

            let attempt = retries + 1;
            let delay = self.delay_for(attempt);
            log::debug!(
                "Retry {}/{} in {:.1}s after: {}",
                attempt,
                self.max_retries,
                delay.as_secs_f64(),
                error
            );
            on_retry(&RetryNotice {
                attempt,
                error: &error,
                delay,
            });
            tokio::select! {
                biased;
                _ = stop.as_mut() => {
                    return Err(RetryFailure {
                        error,
                        retries,
                        abandoned: true,
                    });
                }
                _ = tokio::time::sleep(delay) => {}
            }
            retries = attempt;
        }
    }
}

#[cfg(test)]
#[path = "tests/retry_tests.rs"]
mod tests;

//! Retry policy for remote operations.
//!
//! Only transient failures (timeouts, connection errors, 5xx, 429) are retried.
//! Permanent failures return after the first attempt.

mod backoff;

use std::fmt::Display;
use std::future::Future;
use std::time::{Duration, Instant};

use log::{debug, warn};
use serde::Deserialize;

use crate::error::{Result, SdkError};
use crate::invocation::Invocation;
use crate::transport::{AttemptResult, Failure, Transport};

pub use backoff::Backoff;

/// Default number of attempts, including the first one.
pub const MAX_ATTEMPTS: u32 = 3;

/// Default delay before the first retry, in seconds.
pub const BASE_DELAY_SECS: f64 = 1.0;

/// Default growth factor between consecutive delays.
pub const BACKOFF_MULTIPLIER: f64 = 2.0;

/// Default cap on a single delay, in seconds.
pub const MAX_DELAY_SECS: f64 = 30.0;

/// Recognized retry options. Missing fields take their defaults when deserialized.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryConfig {
    /// Total tries including the first
    pub max_attempts: u32,
    /// Seconds to wait before the first retry
    pub base_delay: f64,
    /// Growth factor per retry, at least 1
    pub backoff_multiplier: f64,
    /// Cap on a single delay, in seconds
    pub max_delay: f64,
    /// Draw each delay uniformly from `[0, computed delay]`
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: MAX_ATTEMPTS,
            base_delay: BASE_DELAY_SECS,
            backoff_multiplier: BACKOFF_MULTIPLIER,
            max_delay: MAX_DELAY_SECS,
            jitter: true,
        }
    }
}

impl RetryConfig {
    /// Fixed-interval schedule used to poll long-running device tasks.
    pub fn polling(max_attempts: u32, interval_secs: f64) -> Self {
        Self {
            max_attempts,
            base_delay: interval_secs,
            backoff_multiplier: 1.0,
            max_delay: interval_secs,
            jitter: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(SdkError::configuration("max_attempts must be at least 1"));
        }
        if !self.base_delay.is_finite() || self.base_delay < 0.0 {
            return Err(SdkError::configuration(format!(
                "base_delay must be a non-negative number of seconds, got {}",
                self.base_delay
            )));
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(SdkError::configuration(format!(
                "backoff_multiplier must be at least 1, got {}",
                self.backoff_multiplier
            )));
        }
        if !self.max_delay.is_finite() || self.max_delay < self.base_delay {
            return Err(SdkError::configuration(format!(
                "max_delay ({}) must be a finite value no smaller than base_delay ({})",
                self.max_delay, self.base_delay
            )));
        }
        if Duration::try_from_secs_f64(self.max_delay).is_err() {
            return Err(SdkError::configuration(format!(
                "max_delay ({}) is too large",
                self.max_delay
            )));
        }
        Ok(())
    }
}

/// Bookkeeping for one `retry` call.
struct RetryState {
    attempt: u32,
    started: Instant,
}

/// Validated retry policy.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
    backoff: Backoff,
}

impl RetryPolicy {
    /// Validates the config; invalid values are configuration errors.
    pub fn new(config: RetryConfig) -> Result<Self> {
        config.validate()?;
        let backoff = Backoff::from_config(&config);
        Ok(Self { config, backoff })
    }

    /// Fixed-interval policy for polling device tasks. Callers pass known-good values.
    pub(crate) fn polling(max_attempts: u32, interval_secs: f64) -> Self {
        let config = RetryConfig::polling(max_attempts, interval_secs);
        let backoff = Backoff::from_config(&config);
        Self { config, backoff }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    /// Runs one invocation through the transport until it succeeds, fails
    /// permanently, or runs out of attempts. Returns the terminal attempt result.
    #[tracing::instrument(skip_all, fields(invocation = %invocation))]
    pub async fn invoke(&self, invocation: &Invocation, transport: &dyn Transport) -> AttemptResult {
        self.retry(
            &invocation.to_string(),
            Failure::is_transient,
            || transport.execute(invocation),
        )
        .await
    }

    /// Executes an async operation with retry logic. `is_transient` decides whether
    /// a failure is worth another attempt.
    pub async fn retry<F, Fut, T, E, C>(
        &self,
        operation_name: &str,
        is_transient: C,
        operation: F,
    ) -> std::result::Result<T, E>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        C: Fn(&E) -> bool,
        E: Display,
    {
        let max_attempts = self.config.max_attempts;
        let mut state = RetryState {
            attempt: 0,
            started: Instant::now(),
        };

        loop {
            state.attempt += 1;
            let error = match operation().await {
                Ok(result) => {
                    if state.attempt > 1 {
                        debug!(
                            "{}: succeeded on attempt {}/{}",
                            operation_name, state.attempt, max_attempts
                        );
                    }
                    return Ok(result);
                }
                Err(e) => e,
            };

            if !is_transient(&error) {
                debug!("{}: non-retryable error: {}", operation_name, error);
                return Err(error);
            }

            if state.attempt >= max_attempts {
                warn!(
                    "{}: giving up after {} attempts in {}ms: {}",
                    operation_name,
                    state.attempt,
                    state.started.elapsed().as_millis(),
                    error
                );
                return Err(error);
            }

            let delay = self.backoff.delay(state.attempt);
            warn!(
                "{}: attempt {}/{} failed ({}), retrying in {}ms...",
                operation_name,
                state.attempt,
                max_attempts,
                error,
                delay.as_millis()
            );
            tokio::time::sleep(delay).await;
        }
    }
}

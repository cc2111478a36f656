// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Retry logic with exponential backoff.
//!
//! Two entry points:
//! - [`retry`]: a plain helper for startup paths (opening the local store)
//!   that retries any error until the attempt budget is spent.
//! - [`RetryEngine`]: the repository path. Each failure is classified, only
//!   retryable kinds are retried, and every attempt is written to the
//!   [`ErrorLog`].
//!
//! # Example
//!
//! ```
//! use site_store::RetryConfig;
//! use std::time::Duration;
//!
//! let query = RetryConfig::query();
//! assert_eq!(query.max_attempts, 3);
//!
//! // Delays between attempts: base, base * factor, ...
//! let schedule = query.backoff_schedule();
//! assert_eq!(schedule, vec![Duration::from_millis(100), Duration::from_millis(200)]);
//! ```

use serde::Deserialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::classify::{classify, Classification};
use super::error_log::ErrorLog;
use crate::storage::traits::StoreError;

/// Configuration for operation retry behavior.
///
/// Use the preset constructors for common patterns:
/// - [`RetryConfig::startup()`] - more patience for initial connections
/// - [`RetryConfig::query()`] - quick retry for individual operations (default)
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    #[serde(with = "millis", rename = "initial_delay_ms")]
    pub initial_delay: Duration,
    #[serde(with = "millis", rename = "max_delay_ms")]
    pub max_delay: Duration,
    pub factor: f64,
    /// Total attempts including the first. Zero is treated as one.
    pub max_attempts: usize,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::query()
    }
}

impl RetryConfig {
    /// Retry for opening local resources at startup.
    /// 5 attempts, failing after ~3 seconds.
    #[must_use]
    pub fn startup() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Quick retry for individual queries (don't block the caller for long).
    /// 3 attempts with fast backoff, then the caller falls back or fails.
    #[must_use]
    pub fn query() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            factor: 2.0,
        }
    }

    /// Fast retry for tests (minimal delays)
    #[must_use]
    pub fn test() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(10),
            factor: 2.0,
        }
    }

    fn attempts(&self) -> usize {
        self.max_attempts.max(1)
    }

    /// Delay slept after failed attempt `attempt` (1-based).
    #[must_use]
    pub fn delay_after(&self, attempt: usize) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as usize) as i32;
        let scaled = self.initial_delay.as_nanos() as f64 * self.factor.max(1.0).powi(exponent);
        if !scaled.is_finite() || scaled >= self.max_delay.as_nanos() as f64 {
            return self.max_delay;
        }
        Duration::from_nanos(scaled.round() as u64).min(self.max_delay)
    }

    /// Every delay a fully failing run would sleep, in order.
    #[must_use]
    pub fn backoff_schedule(&self) -> Vec<Duration> {
        (1..self.attempts()).map(|a| self.delay_after(a)).collect()
    }
}

mod millis {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

/// Retry any failing operation until the attempt budget is spent.
pub async fn retry<F, Fut, T, E>(
    operation_name: &str,
    config: &RetryConfig,
    mut operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let max = config.attempts();
    let mut attempts = 0;

    loop {
        match operation().await {
            Ok(val) => {
                if attempts > 0 {
                    info!("Operation '{}' succeeded after {} retries", operation_name, attempts);
                }
                return Ok(val);
            }
            Err(err) => {
                attempts += 1;
                if attempts >= max {
                    return Err(err);
                }

                let delay = config.delay_after(attempts);
                warn!(
                    "Operation '{}' failed (attempt {}/{}): {}. Retrying in {:?}...",
                    operation_name, attempts, max, err, delay
                );
                sleep(delay).await;
            }
        }
    }
}

/// Successful result plus how many attempts it took.
#[derive(Debug, Clone, PartialEq)]
pub struct Attempted<T> {
    pub value: T,
    pub attempts: usize,
}

/// Final error of an operation, with its classification.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{operation} failed after {attempts} attempt(s) [{}]: {error}", classification.kind)]
pub struct Classified {
    pub operation: String,
    pub error: StoreError,
    pub classification: Classification,
    pub attempts: usize,
}

impl Classified {
    /// Wrap an error that never reached the store (zero attempts).
    #[must_use]
    pub fn immediate(operation: &str, error: StoreError) -> Self {
        let classification = classify(&error);
        Self {
            operation: operation.to_string(),
            error,
            classification,
            attempts: 0,
        }
    }

    /// Retries were spent on a retryable failure.
    #[must_use]
    pub fn exhausted(&self) -> bool {
        self.classification.retryable
    }
}

/// Classifying retry executor shared by all repositories.
#[derive(Clone)]
pub struct RetryEngine {
    config: RetryConfig,
    log: Arc<ErrorLog>,
}

impl RetryEngine {
    pub fn new(config: RetryConfig, log: Arc<ErrorLog>) -> Self {
        Self { config, log }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn log(&self) -> &Arc<ErrorLog> {
        &self.log
    }

    pub async fn execute<T, F, Fut>(&self, operation: &str, op: F) -> Result<Attempted<T>, Classified>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        self.execute_with_context(operation, "", op).await
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or the
    /// attempt budget is spent.
    pub async fn execute_with_context<T, F, Fut>(
        &self,
        operation: &str,
        context: &str,
        mut op: F,
    ) -> Result<Attempted<T>, Classified>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let max = self.config.attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            match op().await {
                Ok(value) => {
                    self.log.record_success(operation, attempt, context);
                    if attempt > 1 {
                        info!(operation, attempt, "Operation succeeded after retry");
                    }
                    return Ok(Attempted { value, attempts: attempt });
                }
                Err(error) => {
                    let classification = classify(&error);
                    let message = error.to_string();
                    self.log
                        .record_failure(operation, attempt, context, classification, &message);
                    crate::metrics::record_attempt_failure(operation, classification.kind.as_str());

                    if !classification.retryable || attempt >= max {
                        debug!(
                            operation,
                            context,
                            attempt,
                            kind = %classification.kind,
                            error = %message,
                            "Giving up"
                        );
                        return Err(Classified {
                            operation: operation.to_string(),
                            error,
                            classification,
                            attempts: attempt,
                        });
                    }

                    let delay = self.config.delay_after(attempt);
                    warn!(
                        operation,
                        context,
                        attempt,
                        max_attempts = max,
                        kind = %classification.kind,
                        error = %message,
                        delay_ms = delay.as_millis() as u64,
                        "Attempt failed, retrying"
                    );
                    crate::metrics::record_retry(operation);
                    sleep(delay).await;
                }
            }
        }
    }
}

// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Remote-then-local execution strategy.
//!
//! [`with_fallback`] runs the primary operation through the [`RetryEngine`].
//! Only when the engine gives up on a *retryable* failure is the fallback
//! operation run; validation, permission and unknown errors surface as-is.

use serde::{Deserialize, Serialize};
use std::future::Future;
use tracing::{error, warn};

use super::classify::classify;
use super::retry::{Classified, RetryEngine};
use crate::storage::traits::StoreError;

/// Where a result came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Remote,
    Fallback,
}

impl DataSource {
    pub fn as_str(self) -> &'static str {
        match self {
            DataSource::Remote => "remote",
            DataSource::Fallback => "fallback",
        }
    }
}

/// A value tagged with its [`DataSource`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sourced<T> {
    pub value: T,
    pub source: DataSource,
}

impl<T> Sourced<T> {
    pub fn remote(value: T) -> Self {
        Self { value, source: DataSource::Remote }
    }

    pub fn fallback(value: T) -> Self {
        Self { value, source: DataSource::Fallback }
    }

    pub fn is_fallback(&self) -> bool {
        self.source == DataSource::Fallback
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Sourced<U> {
        Sourced { value: f(self.value), source: self.source }
    }

    pub fn into_value(self) -> T {
        self.value
    }
}

/// Run `primary` with retry; on retry exhaustion run `fallback` once.
///
/// If the fallback also fails, the primary's classified error is returned and
/// the fallback failure is logged.
pub async fn with_fallback<T, P, PFut, F, FFut>(
    engine: &RetryEngine,
    operation: &str,
    context: &str,
    primary: P,
    fallback: F,
) -> Result<Sourced<T>, Classified>
where
    P: FnMut() -> PFut,
    PFut: Future<Output = Result<T, StoreError>>,
    F: FnOnce() -> FFut,
    FFut: Future<Output = Result<T, StoreError>>,
{
    let failure = match engine.execute_with_context(operation, context, primary).await {
        Ok(done) => return Ok(Sourced::remote(done.value)),
        Err(failure) => failure,
    };

    if !failure.exhausted() {
        return Err(failure);
    }

    warn!(
        operation,
        context,
        attempts = failure.attempts,
        kind = %failure.classification.kind,
        "Remote store unavailable, using fallback store"
    );
    crate::metrics::record_fallback(operation);

    match fallback().await {
        Ok(value) => {
            engine.log().record_success(&format!("{}:fallback", operation), 1, context);
            Ok(Sourced::fallback(value))
        }
        Err(fallback_err) => {
            let message = fallback_err.to_string();
            engine.log().record_failure(
                &format!("{}:fallback", operation),
                1,
                context,
                classify(&fallback_err),
                &message,
            );
            error!(operation, context, error = %message, "Fallback store failed");
            Err(failure)
        }
    }
}

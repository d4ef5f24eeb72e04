//! Retry an action until it succeeds
//!
//! The action runs until it returns `Ok`. Errors matched by one of the given
//! rules are retried until the budget runs out; any other error is returned
//! immediately.
//!
//! # Example
//!
//! ```ignore
//! use virtwait::retry::{retry, RetryConfig};
//! use virtwait::classify;
//!
//! // Label updates race with the controller; retry on 409 only
//! retry(
//!     &RetryConfig::with_timeout(Duration::from_secs(30)),
//!     "label-vm",
//!     [classify::conflict()],
//!     || async { ctx.patch_labels("vm/fedora", &labels).await },
//! )
//! .await?;
//! ```

use crate::sampler::{SamplerError, SleepPolicy, SuppressRule, TimeoutSampler};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use tracing::debug;

/// Budget and pacing for [`retry`]
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Total wall-clock budget
    pub timeout: Duration,
    /// Pause between attempts
    pub policy: SleepPolicy,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            policy: SleepPolicy::exponential(Duration::from_millis(100), Duration::from_secs(5)),
        }
    }
}

impl RetryConfig {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn policy(mut self, policy: SleepPolicy) -> Self {
        self.policy = policy;
        self
    }
}

/// Run `operation` until it returns `Ok`
pub async fn retry<F, Fut, T, E, R>(
    config: &RetryConfig,
    operation_name: &str,
    rules: R,
    operation: F,
) -> Result<T, SamplerError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    T: fmt::Debug,
    E: fmt::Display,
    R: IntoIterator<Item = SuppressRule<E>>,
{
    let result = TimeoutSampler::new(operation)
        .timeout(config.timeout)
        .backoff(config.policy)
        .suppress_all(rules)
        .label(operation_name)
        .first_ok()
        .await;

    if result.is_ok() {
        debug!(operation = %operation_name, "Retry succeeded");
    }
    result
}

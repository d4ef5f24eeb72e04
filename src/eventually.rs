//! Boolean condition helpers
//!
//! `eventually` waits for an async condition to become true; `consistently`
//! checks that it stays true. Both poll with a fixed interval.
//!
//! # Example
//!
//! ```ignore
//! use virtwait::{eventually, consistently};
//! use std::time::Duration;
//!
//! eventually(|| async { vmi_has_ip(&ctx, "fedora").await })
//!     .timeout(Duration::from_secs(120))
//!     .await_condition()
//!     .await?;
//!
//! // The migrated VM must keep answering for the next 30s
//! consistently(|| async { ping(&ip).await })
//!     .duration(Duration::from_secs(30))
//!     .await_condition()
//!     .await?;
//! ```

use crate::sampler::{sampler_fn, SamplerError};
use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Error type for eventually/consistently operations
#[derive(Debug, thiserror::Error)]
pub enum ConditionError {
    #[error("condition not met after {attempts} attempts over {elapsed:?} (timeout {timeout:?})")]
    EventuallyFailed {
        attempts: u32,
        elapsed: Duration,
        timeout: Duration,
    },

    #[error("condition became false after {elapsed:?} ({checks} checks passed)")]
    ConsistentlyFailed { elapsed: Duration, checks: u32 },
}

/// Builder for eventually checks
pub struct Eventually<F> {
    condition: F,
    timeout: Duration,
    interval: Duration,
}

/// Builder for consistently checks
pub struct Consistently<F> {
    condition: F,
    duration: Duration,
    interval: Duration,
    min_checks: u32,
}

/// Retry a condition until it is true
///
/// Default timeout: 30 seconds
/// Default interval: 250ms
pub fn eventually<F, Fut>(condition: F) -> Eventually<F>
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    Eventually {
        condition,
        timeout: Duration::from_secs(30),
        interval: Duration::from_millis(250),
    }
}

/// Verify a condition stays true
///
/// Default duration: 5 seconds
/// Default interval: 250ms
pub fn consistently<F, Fut>(condition: F) -> Consistently<F>
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    Consistently {
        condition,
        duration: Duration::from_secs(5),
        interval: Duration::from_millis(250),
        min_checks: 1,
    }
}

impl<F, Fut> Eventually<F>
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub async fn await_condition(self) -> Result<(), ConditionError> {
        let condition = &self.condition;
        match sampler_fn(condition)
            .timeout(self.timeout)
            .sleep(self.interval)
            .label("eventually")
            .wait_truthy()
            .await
        {
            Ok(_) => Ok(()),
            Err(SamplerError::Timeout(t)) => Err(ConditionError::EventuallyFailed {
                attempts: t.attempts,
                elapsed: t.elapsed,
                timeout: t.timeout,
            }),
            Err(SamplerError::Unexpected(never)) => match never {},
        }
    }
}

impl<F, Fut> Consistently<F>
where
    F: Fn() -> Fut,
    Fut: Future<Output = bool>,
{
    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration = duration;
        self
    }

    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Require at least this many passing checks, even past `duration`
    pub fn min_checks(mut self, checks: u32) -> Self {
        self.min_checks = checks.max(1);
        self
    }

    pub async fn await_condition(self) -> Result<(), ConditionError> {
        let start = Instant::now();
        let mut checks = 0u32;

        loop {
            if !(self.condition)().await {
                return Err(ConditionError::ConsistentlyFailed {
                    elapsed: start.elapsed(),
                    checks,
                });
            }
            checks += 1;

            if start.elapsed() >= self.duration && checks >= self.min_checks {
                return Ok(());
            }

            sleep(self.interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_eventually_succeeds_immediately() {
        let result = eventually(|| async { true })
            .timeout(Duration::from_millis(100))
            .await_condition()
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_eventually_succeeds_after_retries() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let result = eventually(move || {
            let c = c.clone();
            async move { c.fetch_add(1, Ordering::SeqCst) >= 3 }
        })
        .timeout(Duration::from_secs(1))
        .interval(Duration::from_millis(10))
        .await_condition()
        .await;

        assert!(result.is_ok());
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_eventually_times_out() {
        let result = eventually(|| async { false })
            .timeout(Duration::from_millis(100))
            .interval(Duration::from_millis(10))
            .await_condition()
            .await;

        match result.unwrap_err() {
            ConditionError::EventuallyFailed {
                attempts, timeout, ..
            } => {
                assert_eq!(attempts, 11);
                assert_eq!(timeout, Duration::from_millis(100));
            }
            other => panic!("expected EventuallyFailed, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_consistently_succeeds() {
        let result = consistently(|| async { true })
            .duration(Duration::from_millis(100))
            .interval(Duration::from_millis(20))
            .await_condition()
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_consistently_fails_when_condition_changes() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        let result = consistently(move || {
            let c = c.clone();
            async move { c.fetch_add(1, Ordering::SeqCst) < 3 }
        })
        .duration(Duration::from_secs(1))
        .interval(Duration::from_millis(10))
        .await_condition()
        .await;

        match result.unwrap_err() {
            ConditionError::ConsistentlyFailed { checks, .. } => assert_eq!(checks, 3),
            other => panic!("expected ConsistentlyFailed, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_consistently_min_checks() {
        let counter = Arc::new(AtomicU32::new(0));
        let c = counter.clone();

        consistently(move || {
            let c = c.clone();
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                true
            }
        })
        .duration(Duration::ZERO)
        .interval(Duration::from_millis(5))
        .min_checks(4)
        .await_condition()
        .await
        .unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_defaults() {
        let ev = eventually(|| async { true });
        assert_eq!(ev.timeout, Duration::from_secs(30));
        assert_eq!(ev.interval, Duration::from_millis(250));

        let cons = consistently(|| async { true });
        assert_eq!(cons.duration, Duration::from_secs(5));
        assert_eq!(cons.min_checks, 1);
    }
}

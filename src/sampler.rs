//! Timeout sampler: poll a predicate until it holds or a deadline passes
//!
//! A [`TimeoutSampler`] wraps an async predicate that reads cluster state and
//! produces a value. The sampler invokes it immediately, hands the value to the
//! caller, sleeps, and repeats, until the caller is satisfied or the timeout
//! elapses. Each call to [`TimeoutSampler::new`] starts a fresh sequence with a
//! fresh deadline; a finished sampler is never restarted.
//!
//! Errors from the predicate are split in two. Errors matched by one of the
//! sampler's [`SuppressRule`]s mean "not yet" and are retried. Every other
//! error aborts the wait immediately as [`SamplerError::Unexpected`].
//!
//! # Example
//!
//! ```ignore
//! use virtwait::sampler::TimeoutSampler;
//! use virtwait::classify;
//!
//! let vm = TimeoutSampler::new(|| async { ctx.get_dynamic(&Gvr::virtual_machine(), "fedora").await })
//!     .timeout(Duration::from_secs(240))
//!     .sleep(Duration::from_secs(5))
//!     .suppress(classify::not_found())
//!     .label("vm/fedora")
//!     .wait_truthy()
//!     .await?;
//! ```

use crate::truthy::Truthy;
use crate::wait::TimeoutExpired;
use futures::future::Map;
use futures::{FutureExt, Stream};
use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

/// Default wall-clock budget for a sampler
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Default pause between attempts
pub const DEFAULT_SLEEP: Duration = Duration::from_secs(1);

/// How long to pause between attempts
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SleepPolicy {
    /// Same pause after every attempt
    Fixed(Duration),
    /// Pause grows by `factor` after each attempt, capped at `max`
    Exponential {
        initial: Duration,
        max: Duration,
        factor: f64,
    },
}

impl Default for SleepPolicy {
    fn default() -> Self {
        Self::Fixed(DEFAULT_SLEEP)
    }
}

impl SleepPolicy {
    /// Doubling backoff from `initial` up to `max`
    #[must_use]
    pub fn exponential(initial: Duration, max: Duration) -> Self {
        Self::Exponential {
            initial,
            max,
            factor: 2.0,
        }
    }

    /// Pause after `attempts` attempts have run (`attempts >= 1`)
    #[must_use]
    pub fn delay_after(&self, attempts: u32) -> Duration {
        match *self {
            Self::Fixed(d) => d,
            Self::Exponential {
                initial,
                max,
                factor,
            } => {
                let exp = i32::try_from(attempts.saturating_sub(1).min(64)).unwrap_or(64);
                let secs = initial.as_secs_f64() * factor.powi(exp);
                if !secs.is_finite() || secs >= max.as_secs_f64() {
                    max
                } else {
                    Duration::from_secs_f64(secs)
                }
            }
        }
    }
}

/// Marks an error kind as "not ready yet" instead of fatal
///
/// The matcher selects the error kind. Optional message fragments narrow it
/// further: when present, the error text must contain one of them.
pub struct SuppressRule<E> {
    matcher: Arc<dyn Fn(&E) -> bool + Send + Sync>,
    messages: Vec<String>,
}

impl<E> Clone for SuppressRule<E> {
    fn clone(&self) -> Self {
        Self {
            matcher: Arc::clone(&self.matcher),
            messages: self.messages.clone(),
        }
    }
}

impl<E> fmt::Debug for SuppressRule<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SuppressRule")
            .field("messages", &self.messages)
            .finish_non_exhaustive()
    }
}

impl<E: fmt::Display> SuppressRule<E> {
    pub fn new(matcher: impl Fn(&E) -> bool + Send + Sync + 'static) -> Self {
        Self {
            matcher: Arc::new(matcher),
            messages: Vec::new(),
        }
    }

    /// Only suppress when the error text contains one of `messages`
    #[must_use]
    pub fn with_messages<I, S>(mut self, messages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.messages.extend(messages.into_iter().map(Into::into));
        self
    }

    pub fn matches(&self, err: &E) -> bool {
        if !(self.matcher)(err) {
            return false;
        }
        if self.messages.is_empty() {
            return true;
        }
        let text = err.to_string();
        self.messages.iter().any(|m| text.contains(m.as_str()))
    }
}

/// Why a sampler stopped without a result
#[derive(Debug, thiserror::Error)]
pub enum SamplerError<E> {
    #[error("{0}")]
    Timeout(#[from] TimeoutExpired),

    #[error("{0}")]
    Unexpected(E),
}

impl<E> SamplerError<E> {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }

    /// The predicate error, if the wait was aborted by one
    pub fn into_unexpected(self) -> Option<E> {
        match self {
            Self::Unexpected(e) => Some(e),
            Self::Timeout(_) => None,
        }
    }

    pub fn map_unexpected<E2>(self, f: impl FnOnce(E) -> E2) -> SamplerError<E2> {
        match self {
            Self::Timeout(t) => SamplerError::Timeout(t),
            Self::Unexpected(e) => SamplerError::Unexpected(f(e)),
        }
    }
}

type Describe<T> = Box<dyn Fn(&T) -> String + Send + Sync>;

/// Lazily samples a predicate until a deadline
///
/// See the [module docs](self) for the polling contract.
pub struct TimeoutSampler<F, Fut, T, E> {
    func: F,
    timeout: Duration,
    policy: SleepPolicy,
    suppress: Vec<SuppressRule<E>>,
    label: String,
    describe: Option<Describe<T>>,
    started: Option<Instant>,
    attempts: u32,
    last_state: Option<String>,
    last_error: Option<String>,
    terminated: bool,
    _fut: PhantomData<fn() -> Fut>,
}

impl<F, Fut, T, E> TimeoutSampler<F, Fut, T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    T: fmt::Debug,
    E: fmt::Display,
{
    /// Sample a fallible predicate
    ///
    /// Default timeout: 60 seconds
    /// Default sleep: 1 second
    pub fn new(func: F) -> Self {
        Self {
            func,
            timeout: DEFAULT_TIMEOUT,
            policy: SleepPolicy::default(),
            suppress: Vec::new(),
            label: "predicate".to_string(),
            describe: None,
            started: None,
            attempts: 0,
            last_state: None,
            last_error: None,
            terminated: false,
            _fut: PhantomData,
        }
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Fixed pause between attempts
    #[must_use]
    pub fn sleep(mut self, interval: Duration) -> Self {
        self.policy = SleepPolicy::Fixed(interval);
        self
    }

    #[must_use]
    pub fn backoff(mut self, policy: SleepPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Treat errors matching `rule` as "not yet"
    #[must_use]
    pub fn suppress(mut self, rule: SuppressRule<E>) -> Self {
        self.suppress.push(rule);
        self
    }

    #[must_use]
    pub fn suppress_all(mut self, rules: impl IntoIterator<Item = SuppressRule<E>>) -> Self {
        self.suppress.extend(rules);
        self
    }

    /// Name used in logs and in the timeout error
    #[must_use]
    pub fn label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    /// Custom rendering of sampled values for the timeout error
    #[must_use]
    pub fn describe_with(mut self, describe: impl Fn(&T) -> String + Send + Sync + 'static) -> Self {
        self.describe = Some(Box::new(describe));
        self
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Produce the next element of the sampled sequence
    ///
    /// Returns `None` once the sampler has terminated.
    pub async fn next_sample(&mut self) -> Option<Result<T, SamplerError<E>>> {
        if self.terminated {
            return None;
        }
        let start = *self.started.get_or_insert_with(Instant::now);

        loop {
            if self.attempts > 0 {
                let elapsed = start.elapsed();
                if elapsed >= self.timeout {
                    return Some(Err(SamplerError::Timeout(self.expire(elapsed))));
                }
                // Never sleep past the deadline; the attempt at the boundary still counts
                let delay = self
                    .policy
                    .delay_after(self.attempts)
                    .min(self.timeout - elapsed);
                sleep(delay).await;
            }

            self.attempts += 1;
            match (self.func)().await {
                Ok(value) => {
                    self.last_state = Some(self.render(&value));
                    debug!(
                        label = %self.label,
                        attempt = self.attempts,
                        elapsed = ?start.elapsed(),
                        "Sampled"
                    );
                    return Some(Ok(value));
                }
                Err(err) if self.is_suppressed(&err) => {
                    debug!(
                        label = %self.label,
                        attempt = self.attempts,
                        error = %err,
                        "Predicate not ready, retrying"
                    );
                    self.last_error = Some(err.to_string());
                }
                Err(err) => {
                    self.terminated = true;
                    debug!(
                        label = %self.label,
                        attempt = self.attempts,
                        error = %err,
                        "Predicate failed, aborting wait"
                    );
                    return Some(Err(SamplerError::Unexpected(err)));
                }
            }
        }
    }

    /// Wait for the first truthy value
    pub async fn wait_truthy(mut self) -> Result<T, SamplerError<E>>
    where
        T: Truthy,
    {
        while let Some(sample) = self.next_sample().await {
            let value = sample?;
            if value.is_truthy() {
                self.terminated = true;
                return Ok(value);
            }
        }
        Err(self.expired())
    }

    /// Wait for the first successful invocation, whatever its value
    pub async fn first_ok(mut self) -> Result<T, SamplerError<E>> {
        match self.next_sample().await {
            Some(sample) => {
                self.terminated = true;
                sample
            }
            None => Err(self.expired()),
        }
    }

    /// The sampled sequence as a stream
    pub fn into_stream(self) -> impl Stream<Item = Result<T, SamplerError<E>>> {
        futures::stream::unfold(self, |mut sampler| async move {
            let sample = sampler.next_sample().await?;
            Some((sample, sampler))
        })
    }

    fn is_suppressed(&self, err: &E) -> bool {
        self.suppress.iter().any(|rule| rule.matches(err))
    }

    fn render(&self, value: &T) -> String {
        match &self.describe {
            Some(describe) => describe(value),
            None => format!("{value:?}"),
        }
    }

    fn expired(&mut self) -> SamplerError<E> {
        let elapsed = self.started.map(|s| s.elapsed()).unwrap_or_default();
        SamplerError::Timeout(self.expire(elapsed))
    }

    fn expire(&mut self, elapsed: Duration) -> TimeoutExpired {
        self.terminated = true;
        warn!(
            label = %self.label,
            attempts = self.attempts,
            elapsed = ?elapsed,
            timeout = ?self.timeout,
            "Timed out waiting for condition"
        );
        TimeoutExpired::new(self.label.clone(), self.timeout, elapsed)
            .with_state(
                self.last_state
                    .clone()
                    .unwrap_or_else(|| "no value sampled".to_string()),
            )
            .with_last_error(self.last_error.clone())
            .with_attempts(self.attempts)
    }
}

/// Future returned by predicates wrapped with [`sampler_fn`]
pub type Lifted<Fut, T> = Map<Fut, fn(T) -> Result<T, Infallible>>;

/// Sample an infallible predicate
///
/// ```ignore
/// let ready = sampler_fn(|| async { daemonset_ready_count().await })
///     .timeout(Duration::from_secs(10))
///     .wait_truthy()
///     .await?;
/// ```
pub fn sampler_fn<G, GFut, T>(
    mut func: G,
) -> TimeoutSampler<impl FnMut() -> Lifted<GFut, T>, Lifted<GFut, T>, T, Infallible>
where
    G: FnMut() -> GFut,
    GFut: Future<Output = T>,
    T: fmt::Debug,
{
    TimeoutSampler::new(move || func().map(Ok as fn(T) -> Result<T, Infallible>))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Debug, thiserror::Error)]
    enum ProbeError {
        #[error("resource not found: {0}")]
        NotFound(String),
        #[error("invalid value: {0}")]
        Invalid(String),
    }

    fn not_found() -> SuppressRule<ProbeError> {
        SuppressRule::new(|e: &ProbeError| matches!(e, ProbeError::NotFound(_)))
    }

    #[tokio::test(start_paused = true)]
    async fn test_true_on_third_call() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let start = Instant::now();

        let value = sampler_fn(move || {
            let c = c.clone();
            async move { c.fetch_add(1, Ordering::SeqCst) >= 2 }
        })
        .timeout(Duration::from_secs(10))
        .sleep(Duration::from_secs(1))
        .wait_truthy()
        .await
        .unwrap();

        assert!(value);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(2) && elapsed < Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_always_none_times_out() {
        let start = Instant::now();

        let err = sampler_fn(|| async { None::<u32> })
            .timeout(Duration::from_secs(3))
            .sleep(Duration::from_secs(1))
            .label("always-none")
            .wait_truthy()
            .await
            .unwrap_err();

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(3));
        assert!(elapsed <= Duration::from_secs(4));

        match err {
            SamplerError::Timeout(t) => {
                assert_eq!(t.resource, "always-none");
                assert_eq!(t.last_state, "None");
                assert_eq!(t.timeout, Duration::from_secs(3));
                assert_eq!(t.attempts, 4);
            }
            SamplerError::Unexpected(e) => match e {},
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_suppressed_errors_keep_polling() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let value = TimeoutSampler::new(move || {
            let c = c.clone();
            async move {
                if c.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(ProbeError::NotFound("vm/fedora".to_string()))
                } else {
                    Ok(42)
                }
            }
        })
        .timeout(Duration::from_secs(10))
        .suppress(not_found())
        .wait_truthy()
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsuppressed_error_fails_fast() {
        let start = Instant::now();

        let err = TimeoutSampler::new(|| async {
            Err::<u32, _>(ProbeError::Invalid("bad selector".to_string()))
        })
        .timeout(Duration::from_secs(600))
        .suppress(not_found())
        .wait_truthy()
        .await
        .unwrap_err();

        assert_eq!(start.elapsed(), Duration::ZERO);
        assert!(matches!(
            err.into_unexpected(),
            Some(ProbeError::Invalid(msg)) if msg == "bad selector"
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_carries_last_suppressed_error() {
        let err = TimeoutSampler::new(|| async {
            Err::<bool, _>(ProbeError::NotFound("nad/br1".to_string()))
        })
        .timeout(Duration::from_secs(2))
        .suppress(not_found())
        .wait_truthy()
        .await
        .unwrap_err();

        let SamplerError::Timeout(t) = err else {
            panic!("expected timeout");
        };
        assert_eq!(t.last_state, "no value sampled");
        assert_eq!(t.last_error.as_deref(), Some("resource not found: nad/br1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_message_fragments_narrow_rule() {
        let rule = not_found().with_messages(["virtualmachineinstances"]);

        let err = TimeoutSampler::new(|| async {
            Err::<bool, _>(ProbeError::NotFound("pods".to_string()))
        })
        .timeout(Duration::from_secs(5))
        .suppress(rule.clone())
        .wait_truthy()
        .await
        .unwrap_err();
        assert!(!err.is_timeout(), "message did not match, so error is fatal");

        assert!(rule.matches(&ProbeError::NotFound("virtualmachineinstances".to_string())));
        assert!(!rule.matches(&ProbeError::Invalid("virtualmachineinstances".to_string())));
    }

    #[tokio::test(start_paused = true)]
    async fn test_accepts_value_at_deadline() {
        let start = Instant::now();

        let value = sampler_fn(move || async move { start.elapsed() >= Duration::from_secs(3) })
            .timeout(Duration::from_secs(3))
            .sleep(Duration::from_secs(2))
            .wait_truthy()
            .await
            .unwrap();

        assert!(value);
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_attempt_is_immediate() {
        let start = Instant::now();
        let value = sampler_fn(|| async { "ready" })
            .sleep(Duration::from_secs(30))
            .wait_truthy()
            .await
            .unwrap();

        assert_eq!(value, "ready");
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequence_terminates_and_does_not_restart() {
        let mut sampler = sampler_fn(|| async { 0u8 })
            .timeout(Duration::from_secs(2))
            .sleep(Duration::from_secs(1));

        let mut values = 0;
        let mut timed_out = false;
        while let Some(sample) = sampler.next_sample().await {
            match sample {
                Ok(_) => values += 1,
                Err(e) => timed_out = e.is_timeout(),
            }
        }

        assert_eq!(values, 3);
        assert!(timed_out);
        assert!(sampler.is_terminated());
        assert!(sampler.next_sample().await.is_none());
        assert_eq!(sampler.attempts(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stream_yields_every_sample() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();

        let samples: Vec<_> = sampler_fn(move || {
            let c = c.clone();
            async move { c.fetch_add(1, Ordering::SeqCst) }
        })
        .timeout(Duration::from_secs(3))
        .into_stream()
        .collect()
        .await;

        let values: Vec<u32> = samples.iter().filter_map(|s| s.as_ref().ok().copied()).collect();
        assert_eq!(values, vec![0, 1, 2, 3]);
        assert!(samples.last().unwrap().as_ref().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_ok_ignores_truthiness() {
        let value = TimeoutSampler::new(|| async { Ok::<_, ProbeError>(0u32) })
            .first_ok()
            .await
            .unwrap();
        assert_eq!(value, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exponential_backoff_schedule() {
        let start = Instant::now();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let s = seen.clone();

        let _ = sampler_fn(move || {
            s.lock().unwrap().push(start.elapsed());
            async { false }
        })
        .timeout(Duration::from_millis(1000))
        .backoff(SleepPolicy::exponential(
            Duration::from_millis(100),
            Duration::from_millis(400),
        ))
        .wait_truthy()
        .await;

        let ms: Vec<u128> = seen.lock().unwrap().iter().map(|d| d.as_millis()).collect();
        // 0, +100, +200, +400, +300 (clamped to the deadline)
        assert_eq!(ms, vec![0, 100, 300, 700, 1000]);
    }

    #[test]
    fn test_sleep_policy_delays() {
        let fixed = SleepPolicy::Fixed(Duration::from_secs(5));
        assert_eq!(fixed.delay_after(1), Duration::from_secs(5));
        assert_eq!(fixed.delay_after(100), Duration::from_secs(5));

        let exp = SleepPolicy::exponential(Duration::from_millis(100), Duration::from_secs(5));
        assert_eq!(exp.delay_after(1), Duration::from_millis(100));
        assert_eq!(exp.delay_after(2), Duration::from_millis(200));
        assert_eq!(exp.delay_after(10), Duration::from_secs(5));
        assert_eq!(exp.delay_after(u32::MAX), Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_independent_instances_share_nothing() {
        async fn run() -> (u32, Duration) {
            let calls = Arc::new(AtomicU32::new(0));
            let c = calls.clone();
            let start = Instant::now();
            sampler_fn(move || {
                let c = c.clone();
                async move { c.fetch_add(1, Ordering::SeqCst) == 4 }
            })
            .sleep(Duration::from_millis(500))
            .wait_truthy()
            .await
            .unwrap();
            (calls.load(Ordering::SeqCst), start.elapsed())
        }

        let first = run().await;
        let second = run().await;
        assert_eq!(first, second);
        assert_eq!(first.0, 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_describe_with_renders_last_state() {
        let err = sampler_fn(|| async { vec![0u8; 3] })
            .timeout(Duration::ZERO)
            .describe_with(|v| format!("{} bytes", v.len()))
            .first_ok()
            .await;
        assert!(err.is_ok());

        let mut sampler = sampler_fn(|| async { Vec::<u8>::new() })
            .timeout(Duration::ZERO)
            .describe_with(|v| format!("{} items", v.len()));
        assert!(matches!(sampler.next_sample().await, Some(Ok(_))));
        match sampler.next_sample().await {
            Some(Err(SamplerError::Timeout(t))) => assert_eq!(t.last_state, "0 items"),
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}

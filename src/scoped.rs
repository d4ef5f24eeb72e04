//! Scoped resource lifecycles
//!
//! A resource created for a test must be gone when the test is over, whatever
//! the outcome. [`scoped`] gives that guarantee for an async block:
//!
//! 1. create the resource
//! 2. optionally wait until it is ready
//! 3. run the body
//! 4. delete it (also when the body returned an error or panicked)
//! 5. optionally wait until it is gone
//!
//! If step 2 fails, the resource that step 1 created is deleted before the
//! error is returned.
//!
//! # Example
//!
//! ```ignore
//! use virtwait::scoped::{scoped, ScopeOptions};
//!
//! let nad = ctx.scoped_dynamic(&Gvr::network_attachment_definition(), &bridge_nad)?;
//! scoped(nad, ctx.scope_options(), |nad| async move {
//!     // attach a VM to the network...
//! })
//! .await?;
//! ```
//!
//! [`Scoped`] is the guard form for resources that outlive a single block.
//! Dropping an unreleased guard schedules a best-effort delete on the current
//! Tokio runtime; call [`Scoped::release`] for a guaranteed one.

use crate::config::SuiteConfig;
use crate::context::ContextError;
use crate::sampler::TimeoutSampler;
use async_trait::async_trait;
use futures::{FutureExt, StreamExt};
use std::future::Future;
use std::ops::Deref;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// A cluster object that can be created and deleted
#[async_trait]
pub trait Lifecycle: Send + Sync + 'static {
    /// Reference used in logs and errors, e.g. `vm/fedora`
    fn describe(&self) -> String;

    async fn create(&self) -> Result<(), ContextError>;

    /// Whether the object reached its ready state
    async fn is_ready(&self) -> Result<bool, ContextError> {
        Ok(true)
    }

    async fn exists(&self) -> Result<bool, ContextError>;

    /// Delete the object; an object that is already gone is not an error
    async fn delete(&self) -> Result<(), ContextError>;
}

/// Errors from acquiring or releasing a scoped resource
#[derive(Debug, thiserror::Error)]
pub enum ScopeError {
    #[error("failed to create {resource}: {source}")]
    Create {
        resource: String,
        #[source]
        source: ContextError,
    },

    #[error("{resource} never became ready: {source}")]
    NotReady {
        resource: String,
        #[source]
        source: ContextError,
    },

    #[error("failed to release {resource}: {source}")]
    Release {
        resource: String,
        #[source]
        source: ContextError,
    },
}

/// Waits performed around acquisition and release
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeOptions {
    /// Wait for `is_ready` after creation
    pub ready_timeout: Option<Duration>,
    /// Wait for `exists` to turn false after deletion
    pub delete_timeout: Option<Duration>,
    /// Pause between polls
    pub interval: Duration,
}

impl Default for ScopeOptions {
    fn default() -> Self {
        Self {
            ready_timeout: None,
            delete_timeout: None,
            interval: Duration::from_secs(1),
        }
    }
}

impl ScopeOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for readiness and deletion with the suite's budgets
    pub fn from_config(config: &SuiteConfig) -> Self {
        Self {
            ready_timeout: Some(config.wait_timeout),
            delete_timeout: Some(config.delete_timeout),
            interval: config.poll_interval,
        }
    }

    #[must_use]
    pub fn wait_ready(mut self, timeout: Duration) -> Self {
        self.ready_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn wait_deleted(mut self, timeout: Duration) -> Self {
        self.delete_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

/// Guard owning a created resource
pub struct Scoped<L: Lifecycle> {
    inner: Arc<L>,
    options: ScopeOptions,
    released: bool,
}

impl<L: Lifecycle> Scoped<L> {
    /// Create the resource and wait for readiness if configured
    pub async fn acquire(lifecycle: L, options: ScopeOptions) -> Result<Self, ScopeError> {
        let resource = lifecycle.describe();

        lifecycle
            .create()
            .await
            .map_err(|source| ScopeError::Create {
                resource: resource.clone(),
                source,
            })?;
        info!(resource = %resource, "Created scoped resource");

        let guard = Self {
            inner: Arc::new(lifecycle),
            options,
            released: false,
        };

        if let Some(timeout) = guard.options.ready_timeout {
            if let Err(source) = guard.wait_ready(timeout).await {
                if let Err(e) = guard.release_inner().await {
                    warn!(resource = %resource, error = %e, "Cleanup after failed readiness also failed");
                }
                let mut guard = guard;
                guard.released = true;
                return Err(ScopeError::NotReady { resource, source });
            }
        }

        Ok(guard)
    }

    /// Shared handle to the resource
    pub fn shared(&self) -> Arc<L> {
        Arc::clone(&self.inner)
    }

    /// Delete the resource and wait for it to disappear if configured
    pub async fn release(mut self) -> Result<(), ScopeError> {
        self.released = true;
        self.release_inner()
            .await
            .map_err(|source| ScopeError::Release {
                resource: self.inner.describe(),
                source,
            })
    }

    async fn wait_ready(&self, timeout: Duration) -> Result<(), ContextError> {
        let inner = &self.inner;
        TimeoutSampler::new(|| inner.is_ready())
            .timeout(timeout)
            .sleep(self.options.interval)
            .label(inner.describe())
            .wait_truthy()
            .await
            .map(|_| ())
            .map_err(ContextError::from)
    }

    async fn release_inner(&self) -> Result<(), ContextError> {
        let resource = self.inner.describe();
        self.inner.delete().await?;
        debug!(resource = %resource, "Deleted scoped resource");

        if let Some(timeout) = self.options.delete_timeout {
            let inner = &self.inner;
            TimeoutSampler::new(|| async move { inner.exists().await.map(|exists| !exists) })
                .timeout(timeout)
                .sleep(self.options.interval)
                .label(format!("deletion of {resource}"))
                .wait_truthy()
                .await
                .map_err(ContextError::from)?;
        }

        info!(resource = %resource, "Released scoped resource");
        Ok(())
    }
}

impl<L: Lifecycle> Deref for Scoped<L> {
    type Target = L;

    fn deref(&self) -> &L {
        &self.inner
    }
}

impl<L: Lifecycle> Drop for Scoped<L> {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        let resource = self.inner.describe();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!(resource = %resource, "Scoped resource dropped without release, deleting in background");
                let inner = Arc::clone(&self.inner);
                handle.spawn(async move {
                    if let Err(e) = inner.delete().await {
                        warn!(resource = %resource, error = %e, "Background delete failed");
                    }
                });
            }
            Err(_) => {
                warn!(resource = %resource, "Scoped resource dropped outside a runtime, leaking it");
            }
        }
    }
}

/// Run `body` with a freshly acquired resource, releasing it on every exit path
///
/// A panic in `body` is resumed after the release. When the body completes but
/// the release fails, the release error is returned.
pub async fn scoped<L, F, Fut, R>(
    lifecycle: L,
    options: ScopeOptions,
    body: F,
) -> Result<R, ScopeError>
where
    L: Lifecycle,
    F: FnOnce(Arc<L>) -> Fut,
    Fut: Future<Output = R>,
{
    let guard = Scoped::acquire(lifecycle, options).await?;
    let outcome = AssertUnwindSafe(body(guard.shared())).catch_unwind().await;
    let released = guard.release().await;

    match outcome {
        Ok(value) => released.map(|()| value),
        Err(panic) => {
            if let Err(e) = released {
                warn!(error = %e, "Release after panic failed");
            }
            std::panic::resume_unwind(panic)
        }
    }
}

/// A group of scoped resources acquired together
pub struct ScopedSet<L: Lifecycle> {
    members: Vec<Scoped<L>>,
}

impl<L: Lifecycle> ScopedSet<L> {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &L> {
        self.members.iter().map(|m| &**m)
    }

    /// Release every member concurrently; reports the first failure
    pub async fn release(self) -> Result<(), ScopeError> {
        release_all(self.members).await
    }
}

async fn release_all<L: Lifecycle>(members: Vec<Scoped<L>>) -> Result<(), ScopeError> {
    let results = futures::future::join_all(members.into_iter().map(Scoped::release)).await;
    results.into_iter().collect()
}

/// Acquire many resources with at most `concurrency` acquisitions in flight
///
/// After the first failure no further acquisition is started. Those already
/// in flight run to completion, then every resource acquired so far is
/// released and the first error is returned.
pub async fn acquire_all<L, I>(
    lifecycles: I,
    options: ScopeOptions,
    concurrency: usize,
) -> Result<ScopedSet<L>, ScopeError>
where
    L: Lifecycle,
    I: IntoIterator<Item = L>,
{
    let failed = AtomicBool::new(false);
    let mut acquisitions = futures::stream::iter(lifecycles)
        .take_while(|_| futures::future::ready(!failed.load(Ordering::SeqCst)))
        .map(|l| Scoped::acquire(l, options.clone()))
        .buffer_unordered(concurrency.max(1));

    let mut members = Vec::new();
    let mut first_error = None;
    while let Some(result) = acquisitions.next().await {
        match result {
            Ok(member) => members.push(member),
            Err(e) if first_error.is_none() => {
                failed.store(true, Ordering::SeqCst);
                first_error = Some(e);
            }
            Err(e) => warn!(error = %e, "Additional acquisition failure"),
        }
    }
    drop(acquisitions);

    match first_error {
        None => Ok(ScopedSet { members }),
        Some(err) => {
            if let Err(e) = release_all(members).await {
                warn!(error = %e, "Release after partial acquisition failed");
            }
            Err(err)
        }
    }
}

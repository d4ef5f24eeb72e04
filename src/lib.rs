//! Virtwait - condition polling for KubeVirt end-to-end tests
//!
//! Virtualization tests spend most of their time waiting: for a VM to boot,
//! a DataVolume to import, a migration to finish, a metric to show up.
//! Virtwait provides one polling primitive, [`TimeoutSampler`], and builds the
//! rest of the suite plumbing on top of it:
//!
//! - [`Context`]: an isolated test namespace with typed and unstructured CRUD
//!   and waits that report the last observed state on timeout
//! - [`scoped()`] / [`Scoped`]: create-on-enter, delete-on-exit resource
//!   lifecycles, including cleanup after a panicking test body
//! - [`eventually()`] / [`consistently()`]: boolean condition helpers
//! - [`prometheus`]: metric waits against the Prometheus HTTP API
//! - `#[virtwait::test]`: injects a `Context`, prints diagnostics on failure
//!   and cleans up the namespace
//!
//! # Example
//!
//! ```ignore
//! use virtwait::{Context, Gvr};
//! use virtwait::conditions::printable_status;
//!
//! #[virtwait::test]
//! async fn test_vm_boots(ctx: Context) {
//!     ctx.apply_dynamic(&Gvr::virtual_machine(), &fedora_vm("fedora"))
//!         .await
//!         .unwrap();
//!
//!     ctx.wait_for_dynamic(
//!         &Gvr::virtual_machine(),
//!         "fedora",
//!         printable_status("Running"),
//!         virtwait::config::timeouts::TIMEOUT_5MIN,
//!     )
//!     .await
//!     .unwrap();
//!
//!     ctx.wait_ready("vmi/fedora").await.unwrap();
//! }
//! ```
//!
//! # Sampling
//!
//! ```
//! use std::time::Duration;
//! use virtwait::sampler_fn;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let mut polls = 0;
//! let result = sampler_fn(|| {
//!     polls += 1;
//!     let done = polls >= 3;
//!     async move { done }
//! })
//! .timeout(Duration::from_secs(5))
//! .sleep(Duration::from_millis(10))
//! .wait_truthy()
//! .await;
//!
//! assert!(matches!(result, Ok(true)));
//! # }
//! ```

pub mod classify;
pub mod conditions;
pub mod config;
pub mod context;
pub mod diagnostics;
pub mod eventually;
pub mod prometheus;
pub mod registry;
pub mod retry;
pub mod sampler;
pub mod scoped;
pub mod telemetry;
pub mod truthy;
pub mod wait;

// Re-export commonly used types
pub use config::{ConfigError, SuiteConfig};
pub use context::{Context, ContextError, DynamicResource, Gvr, KubeObject, ResourceKind};
pub use diagnostics::Diagnostics;
pub use eventually::{consistently, eventually, ConditionError};
pub use prometheus::{PrometheusClient, PrometheusError};
pub use registry::{FixtureArgs, FixtureRegistry};
pub use retry::{retry, RetryConfig};
pub use sampler::{sampler_fn, SamplerError, SleepPolicy, SuppressRule, TimeoutSampler};
pub use scoped::{acquire_all, scoped, Lifecycle, ScopeError, ScopeOptions, Scoped, ScopedSet};
pub use truthy::Truthy;
pub use wait::TimeoutExpired;

// Re-export the test macro
pub use virtwait_macros::test;

//! Cluster context
//!
//! Provides a connection to a cluster with an isolated test namespace. Every
//! wait issued through the context is a [`TimeoutSampler`](crate::sampler::TimeoutSampler)
//! paced by the shared [`SuiteConfig`].
//!
//! # Errors
//!
//! All fallible methods return [`ContextError`]. Errors returned by the API
//! server are classified: 404 becomes [`ContextError::NotFound`], 409 becomes
//! [`ContextError::Conflict`], throttling and 5xx become
//! [`ContextError::Transient`]. Waits suppress `NotFound` only.

#![allow(clippy::missing_errors_doc)]

mod crud;
mod diagnostics_ctx;
mod dynamic;
mod lifecycle;
mod parsing;
mod readiness;
mod scoping;
pub mod types;
mod waiting;

pub use parsing::{extract_resource_name, parse_resource_ref};
pub use scoping::{DynamicResource, KubeObject};
pub use types::{Gvr, ResourceKind};

use crate::classify;
use crate::config::SuiteConfig;
use crate::sampler::SamplerError;
use kube::Client;
use std::sync::Arc;

/// Cluster connection bound to one test namespace
///
/// ```ignore
/// use virtwait::Context;
///
/// let ctx = Context::new().await?;
/// ctx.apply_dynamic(&Gvr::virtual_machine(), &fedora_vm).await?;
/// ctx.wait_ready("vm/fedora").await?;
/// ctx.cleanup().await?;
/// ```
#[derive(Clone)]
pub struct Context {
    /// Kubernetes client
    pub client: Client,
    /// Namespace for operations
    pub namespace: String,
    config: Arc<SuiteConfig>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("namespace", &self.namespace)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Context {
    /// Configuration shared by this context's waits
    pub fn config(&self) -> &SuiteConfig {
        &self.config
    }
}

/// Errors from Context operations
#[derive(Debug, thiserror::Error)]
pub enum ContextError {
    #[error("Failed to create Kubernetes client: {0}")]
    ClientError(String),

    #[error("Invalid configuration: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Failed to create namespace: {0}")]
    NamespaceError(String),

    #[error("Failed to cleanup namespace: {0}")]
    CleanupError(String),

    #[error("Failed to apply resource: {0}")]
    ApplyError(String),

    #[error("Failed to create resource: {0}")]
    CreateError(String),

    #[error("Failed to get resource: {0}")]
    GetError(String),

    #[error("{0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("API server unavailable: {0}")]
    Transient(String),

    #[error("Failed to delete resource: {0}")]
    DeleteError(String),

    #[error("Failed to list resources: {0}")]
    ListError(String),

    #[error("Failed to get logs: {0}")]
    LogsError(String),

    #[error("Failed to get events: {0}")]
    EventsError(String),

    #[error("{0}")]
    WaitTimeout(#[from] crate::wait::TimeoutExpired),

    #[error("Invalid resource reference: {0}")]
    InvalidResourceRef(String),
}

impl ContextError {
    /// Classify a kube error for `kind`/`name`
    ///
    /// `fallback` wraps anything that is not a 404, a 409 or a transient failure.
    pub(crate) fn from_kube(
        err: &kube::Error,
        kind: &str,
        name: &str,
        fallback: fn(String) -> ContextError,
    ) -> Self {
        let message = improve_error_message(err, kind, name);
        if classify::is_not_found(err) {
            ContextError::NotFound(message)
        } else if classify::is_conflict(err) {
            ContextError::Conflict(message)
        } else if classify::is_transient(err) {
            ContextError::Transient(message)
        } else {
            fallback(message)
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, ContextError::NotFound(_))
    }
}

impl From<SamplerError<ContextError>> for ContextError {
    fn from(err: SamplerError<ContextError>) -> Self {
        match err {
            SamplerError::Timeout(t) => ContextError::WaitTimeout(t),
            SamplerError::Unexpected(e) => e,
        }
    }
}

/// Improve a kube error message with human-readable context
fn improve_error_message(err: &kube::Error, resource_kind: &str, resource_name: &str) -> String {
    if let kube::Error::Api(ae) = err {
        match ae.code {
            404 => return format!("{resource_kind} '{resource_name}' not found"),
            409 if ae.reason == "AlreadyExists" => {
                return format!("{resource_kind} '{resource_name}' already exists");
            }
            409 => {
                return format!("{resource_kind} '{resource_name}' was modified concurrently");
            }
            403 => {
                return format!("{resource_kind} '{resource_name}': permission denied (check RBAC)");
            }
            422 => {
                return format!("{resource_kind} '{resource_name}' rejected: {}", ae.message);
            }
            _ => {}
        }
    }

    let raw = err.to_string();

    if raw.contains("connection refused") || raw.contains("ECONNREFUSED") {
        return format!("{resource_kind} '{resource_name}': cannot connect to Kubernetes API");
    }

    if raw.contains("timeout") || raw.contains("deadline exceeded") {
        return format!("{resource_kind} '{resource_name}': operation timed out");
    }

    format!("{resource_kind} '{resource_name}': {raw}")
}

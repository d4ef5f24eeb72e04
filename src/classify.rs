//! Failure classification for cluster calls
//!
//! Waits only retry errors that mean "the cluster has not converged yet".
//! These helpers name those kinds so call sites suppress them explicitly.

use crate::context::ContextError;
use crate::sampler::SuppressRule;

/// HTTP statuses worth retrying
const TRANSIENT_CODES: [u16; 5] = [429, 500, 502, 503, 504];

/// The object does not exist (yet)
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// Optimistic-concurrency conflict on update
pub fn is_conflict(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409)
}

/// The API server is overloaded or unreachable for a moment
pub fn is_transient(err: &kube::Error) -> bool {
    match err {
        kube::Error::Api(ae) => TRANSIENT_CODES.contains(&ae.code),
        kube::Error::HyperError(_) | kube::Error::Service(_) => true,
        _ => false,
    }
}

/// Suppress [`ContextError::NotFound`]
pub fn not_found() -> SuppressRule<ContextError> {
    SuppressRule::new(|e: &ContextError| matches!(e, ContextError::NotFound(_)))
}

/// Suppress [`ContextError::Conflict`]
pub fn conflict() -> SuppressRule<ContextError> {
    SuppressRule::new(|e: &ContextError| matches!(e, ContextError::Conflict(_)))
}

/// Suppress [`ContextError::Transient`]
pub fn transient() -> SuppressRule<ContextError> {
    SuppressRule::new(|e: &ContextError| matches!(e, ContextError::Transient(_)))
}

/// Suppress a raw 404 from kube
pub fn kube_not_found() -> SuppressRule<kube::Error> {
    SuppressRule::new(is_not_found)
}

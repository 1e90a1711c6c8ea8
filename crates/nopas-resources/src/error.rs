//! Resource error types.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while reading or scaling a resource.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ResourceError {
    /// Transient: network failure, API error or call timeout.
    #[error("backend unavailable for {resource}: {reason}")]
    BackendUnavailable { resource: String, reason: String },

    /// The backend returned the wrong number of matching entities.
    #[error("unexpected topology for {resource}: expected {expected}, found {found}")]
    UnexpectedTopology {
        resource: String,
        expected: String,
        found: usize,
    },

    /// The write was accepted but a read-back shows a different count.
    #[error("scale verification failed for {resource}: intended {intended}, observed {observed}")]
    ScaleVerificationFailed {
        resource: String,
        intended: i64,
        observed: i64,
    },

    #[error("credential error for {path}: {reason}")]
    Credential { path: String, reason: String },

    #[error("invalid plan for {resource}: {reason}")]
    InvalidPlan { resource: String, reason: String },

    #[error("no running allocation to restart for {resource}")]
    NoRunningAllocation { resource: String },

    #[error("{operation} is not supported by {resource}")]
    Unsupported { resource: String, operation: String },
}

impl ResourceError {
    pub fn unavailable(resource: &str, reason: impl ToString) -> Self {
        ResourceError::BackendUnavailable {
            resource: resource.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Whether retrying on the next cycle can succeed without an operator.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ResourceError::BackendUnavailable { .. } | ResourceError::Credential { .. }
        )
    }
}

pub type ResourceResult<T> = Result<T, ResourceError>;

/// Run one backend call under `timeout`; expiry is `BackendUnavailable`.
pub(crate) async fn bounded<T, F>(timeout: Duration, resource: &str, call: F) -> ResourceResult<T>
where
    F: Future<Output = ResourceResult<T>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(ResourceError::unavailable(
            resource,
            format!("call timed out after {}ms", timeout.as_millis()),
        )),
    }
}

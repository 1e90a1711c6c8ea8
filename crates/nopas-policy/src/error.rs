//! Policy error types.

use nopas_resources::ResourceError;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum PolicyError {
    #[error("unknown policy kind: {0}")]
    UnknownPolicyKind(String),

    #[error("{policy}: missing metadata field {field}")]
    MissingMetadata { policy: String, field: String },

    #[error("{policy}: metadata decode failed: {reason}")]
    MetadataDecode { policy: String, reason: String },

    /// Metadata decoded but violates a constraint (e.g. `Begin >= End`).
    #[error("{policy}: invalid metadata: {reason}")]
    InvalidMetadata { policy: String, reason: String },

    #[error("{policy}: unknown managed resource {resource}")]
    UnknownResource { policy: String, resource: String },

    #[error("{policy}: no managed resources")]
    NoManagedResources { policy: String },

    #[error("{policy}: core ratio signal unavailable")]
    SignalUnavailable { policy: String },

    #[error("{policy}: current count of {resource} unavailable")]
    CountUnavailable { policy: String, resource: String },

    #[error(transparent)]
    Resource(#[from] ResourceError),
}

pub type PolicyResult<T> = Result<T, PolicyError>;

//! Persisted record types.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use nopas_core::Count;

/// What happened to one reconciliation attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum EventOutcome {
    Applied,
    /// The clamped target already matched the live count.
    Unchanged,
    Failed { reason: String },
}

/// One reconciliation attempt against one resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingEvent {
    pub resource: String,
    /// Backend identity, e.g. `nomad:worker@http://nomad:4646`.
    pub backend: String,
    /// Merged target before clamping.
    pub requested: Count,
    pub old: Option<Count>,
    pub new: Option<Count>,
    pub outcome: EventOutcome,
    pub at_ms: u64,
}

impl ScalingEvent {
    pub fn key_prefix(resource: &str) -> String {
        format!("{resource}:")
    }

    pub fn table_key(&self, seq: u64) -> String {
        format!("{}:{:020}:{:010}", self.resource, self.at_ms, seq)
    }
}

pub fn epoch_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

//! CoreRatio: scale on cluster CPU allocation.
//!
//! ```text
//! r = allocated cpu shares / total cpu shares   (ready nodes only)
//! c = current count of the managed resource
//!
//! r > MaxThreshold  →  ScaleUp.apply(c)
//! r < MinThreshold  →  ScaleDown.apply(c)
//! otherwise         →  c
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use nopas_core::{Count, GenericSubPolicy, ScalingMagnitude};
use nopas_resources::{NomadHttpClient, Resource, ResourceError, SecretStore};

use crate::context::EvaluationContext;
use crate::error::{PolicyError, PolicyResult};
use crate::subpolicy::{SubPolicyKind, decode_metadata, managed_names, required};

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Metadata {
    max_threshold: Option<f64>,
    min_threshold: Option<f64>,
    scale_up: Option<ScalingMagnitude>,
    scale_down: Option<ScalingMagnitude>,
}

#[derive(Clone)]
pub struct CoreRatio {
    managed: Vec<Arc<Resource>>,
    max_threshold: f64,
    min_threshold: f64,
    scale_up: ScalingMagnitude,
    scale_down: ScalingMagnitude,
    metadata: Value,
}

impl CoreRatio {
    const KIND: SubPolicyKind = SubPolicyKind::CoreRatio;

    pub fn new(managed: Vec<Arc<Resource>>, metadata: &Value) -> PolicyResult<Self> {
        let policy = Self::KIND.as_str();
        let raw: Metadata = decode_metadata(policy, metadata)?;

        let max_threshold = required(policy, "MaxThreshold", raw.max_threshold)?;
        let min_threshold = required(policy, "MinThreshold", raw.min_threshold)?;
        let scale_up = required(policy, "ScaleUp", raw.scale_up)?;
        let scale_down = required(policy, "ScaleDown", raw.scale_down)?;

        if !(min_threshold.is_finite() && max_threshold.is_finite()) || min_threshold > max_threshold
        {
            return Err(PolicyError::InvalidMetadata {
                policy: policy.to_string(),
                reason: format!(
                    "need MinThreshold <= MaxThreshold, got {min_threshold} and {max_threshold}"
                ),
            });
        }

        Ok(Self {
            managed,
            max_threshold,
            min_threshold,
            scale_up,
            scale_down,
            metadata: metadata.clone(),
        })
    }

    pub fn managed_resources(&self) -> &[Arc<Resource>] {
        &self.managed
    }

    pub fn count_for(&self, ratio: f64, current: Count) -> Count {
        if ratio > self.max_threshold {
            self.scale_up.apply(current)
        } else if ratio < self.min_threshold {
            self.scale_down.apply(current)
        } else {
            current
        }
    }

    /// Fails as a whole if the signal or any managed count is missing.
    pub fn recommend(&self, ctx: &EvaluationContext) -> PolicyResult<BTreeMap<String, Count>> {
        let policy = Self::KIND.as_str();
        let ratio = ctx.core_ratio.ok_or_else(|| PolicyError::SignalUnavailable {
            policy: policy.to_string(),
        })?;

        let mut recs = BTreeMap::new();
        for resource in &self.managed {
            let current = ctx.current_count(resource.name()).ok_or_else(|| {
                PolicyError::CountUnavailable {
                    policy: policy.to_string(),
                    resource: resource.name().to_string(),
                }
            })?;
            let target = self.count_for(ratio, current);
            debug!(resource = %resource.name(), ratio, current, target, "core ratio recommendation");
            recs.insert(resource.name().to_string(), target);
        }
        Ok(recs)
    }

    pub fn to_generic(&self) -> GenericSubPolicy {
        GenericSubPolicy {
            name: Self::KIND.as_str().to_string(),
            managed_resources: managed_names(&self.managed),
            metadata: self.metadata.clone(),
        }
    }
}

// ── Signal ────────────────────────────────────────────────────────

/// Where the cluster core ratio comes from.
#[async_trait]
pub trait CoreRatioSource: Send + Sync {
    /// `Ok(None)` when the cluster reports no CPU at all.
    async fn core_ratio(&self) -> PolicyResult<Option<f64>>;
}

/// Core ratio read from the Nomad node and allocation APIs.
pub struct NomadCoreRatio {
    client: NomadHttpClient,
    secrets: Arc<dyn SecretStore>,
    token_path: String,
    call_timeout: Duration,
}

impl NomadCoreRatio {
    pub fn new(
        address: &str,
        token_path: &str,
        secrets: Arc<dyn SecretStore>,
        call_timeout: Duration,
    ) -> PolicyResult<Self> {
        Ok(Self {
            client: NomadHttpClient::new(address, call_timeout)?,
            secrets,
            token_path: token_path.to_string(),
            call_timeout,
        })
    }
}

#[async_trait]
impl CoreRatioSource for NomadCoreRatio {
    async fn core_ratio(&self) -> PolicyResult<Option<f64>> {
        let timed_out = || ResourceError::unavailable("core-ratio", "signal timed out");

        let token = tokio::time::timeout(self.call_timeout, self.secrets.get_token(&self.token_path))
            .await
            .map_err(|_| timed_out())??;

        // One HTTP call per node; allow the whole walk a few timeouts.
        let ratio = tokio::time::timeout(
            self.call_timeout.saturating_mul(3),
            self.client.cluster_core_ratio(&token),
        )
        .await
        .map_err(|_| timed_out())??;

        Ok(ratio)
    }
}

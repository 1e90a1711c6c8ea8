//! DailySchedule: a fixed count per time-of-day window.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use nopas_core::{Count, GenericSubPolicy, ScalingWindow};
use nopas_resources::Resource;

use crate::context::EvaluationContext;
use crate::error::{PolicyError, PolicyResult};
use crate::subpolicy::{SubPolicyKind, decode_metadata, managed_names, required};

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Metadata {
    default: Option<Count>,
    schedule: Option<Vec<ScalingWindow>>,
}

#[derive(Clone)]
pub struct DailySchedule {
    managed: Vec<Arc<Resource>>,
    default: Count,
    schedule: Vec<ScalingWindow>,
    /// Metadata as loaded, re-emitted by `to_generic`.
    metadata: Value,
}

impl DailySchedule {
    const KIND: SubPolicyKind = SubPolicyKind::DailySchedule;

    pub fn new(managed: Vec<Arc<Resource>>, metadata: &Value) -> PolicyResult<Self> {
        let policy = Self::KIND.as_str();
        let raw: Metadata = decode_metadata(policy, metadata)?;
        let default = required(policy, "Default", raw.default)?;
        let schedule = required(policy, "Schedule", raw.schedule)?;

        for (i, window) in schedule.iter().enumerate() {
            if !window.is_valid() {
                return Err(PolicyError::InvalidMetadata {
                    policy: policy.to_string(),
                    reason: format!(
                        "Schedule[{i}]: need Begin < End <= 1440, got [{}, {})",
                        window.begin, window.end
                    ),
                });
            }
        }

        Ok(Self {
            managed,
            default,
            schedule,
            metadata: metadata.clone(),
        })
    }

    pub fn managed_resources(&self) -> &[Arc<Resource>] {
        &self.managed
    }

    /// First window containing `minute_of_day`, else `Default`.
    pub fn count_at(&self, minute_of_day: u32) -> Count {
        self.schedule
            .iter()
            .find(|w| w.contains(minute_of_day))
            .map(|w| w.count)
            .unwrap_or(self.default)
    }

    pub fn recommend(&self, ctx: &EvaluationContext) -> BTreeMap<String, Count> {
        let count = self.count_at(ctx.minute_of_day);
        self.managed
            .iter()
            .map(|r| (r.name().to_string(), count))
            .collect()
    }

    pub fn to_generic(&self) -> GenericSubPolicy {
        GenericSubPolicy {
            name: Self::KIND.as_str().to_string(),
            managed_resources: managed_names(&self.managed),
            metadata: self.metadata.clone(),
        }
    }
}

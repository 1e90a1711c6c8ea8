//! Sub-policy kinds and the factory that builds them from storage form.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use nopas_core::{Count, GenericSubPolicy};
use nopas_resources::{Resource, ResourceSet};

use crate::context::EvaluationContext;
use crate::core_ratio::CoreRatio;
use crate::daily_schedule::DailySchedule;
use crate::error::{PolicyError, PolicyResult};
use crate::office_hour::OfficeHour;

/// Every policy kind nopas understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubPolicyKind {
    DailySchedule,
    OfficeHour,
    CoreRatio,
}

impl SubPolicyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubPolicyKind::DailySchedule => "DailySchedule",
            SubPolicyKind::OfficeHour => "OfficeHour",
            SubPolicyKind::CoreRatio => "CoreRatio",
        }
    }
}

impl FromStr for SubPolicyKind {
    type Err = PolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "DailySchedule" => Ok(SubPolicyKind::DailySchedule),
            "OfficeHour" => Ok(SubPolicyKind::OfficeHour),
            "CoreRatio" => Ok(SubPolicyKind::CoreRatio),
            other => Err(PolicyError::UnknownPolicyKind(other.to_string())),
        }
    }
}

impl fmt::Display for SubPolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A live sub-policy.
#[derive(Clone)]
pub enum SubPolicy {
    DailySchedule(DailySchedule),
    OfficeHour(OfficeHour),
    CoreRatio(CoreRatio),
}

impl SubPolicy {
    pub fn kind(&self) -> SubPolicyKind {
        match self {
            SubPolicy::DailySchedule(_) => SubPolicyKind::DailySchedule,
            SubPolicy::OfficeHour(_) => SubPolicyKind::OfficeHour,
            SubPolicy::CoreRatio(_) => SubPolicyKind::CoreRatio,
        }
    }

    pub fn managed_resources(&self) -> &[Arc<Resource>] {
        match self {
            SubPolicy::DailySchedule(p) => p.managed_resources(),
            SubPolicy::OfficeHour(p) => p.managed_resources(),
            SubPolicy::CoreRatio(p) => p.managed_resources(),
        }
    }

    /// One recommendation per managed resource.
    pub fn recommend(&self, ctx: &EvaluationContext) -> PolicyResult<BTreeMap<String, Count>> {
        match self {
            SubPolicy::DailySchedule(p) => Ok(p.recommend(ctx)),
            SubPolicy::OfficeHour(p) => Ok(p.recommend(ctx)),
            SubPolicy::CoreRatio(p) => p.recommend(ctx),
        }
    }

    pub fn to_generic(&self) -> GenericSubPolicy {
        match self {
            SubPolicy::DailySchedule(p) => p.to_generic(),
            SubPolicy::OfficeHour(p) => p.to_generic(),
            SubPolicy::CoreRatio(p) => p.to_generic(),
        }
    }
}

/// Build a sub-policy from its storage form, resolving managed resource
/// names against `resources`.
pub fn create_subpolicy(
    generic: &GenericSubPolicy,
    resources: &ResourceSet,
) -> PolicyResult<SubPolicy> {
    let kind: SubPolicyKind = generic.name.parse()?;
    let policy = kind.as_str();

    if generic.managed_resources.is_empty() {
        return Err(PolicyError::NoManagedResources {
            policy: policy.to_string(),
        });
    }

    let managed = generic
        .managed_resources
        .iter()
        .map(|name| {
            resources
                .get(name)
                .cloned()
                .ok_or_else(|| PolicyError::UnknownResource {
                    policy: policy.to_string(),
                    resource: name.clone(),
                })
        })
        .collect::<PolicyResult<Vec<_>>>()?;

    let metadata = &generic.metadata;
    Ok(match kind {
        SubPolicyKind::DailySchedule => SubPolicy::DailySchedule(DailySchedule::new(managed, metadata)?),
        SubPolicyKind::OfficeHour => SubPolicy::OfficeHour(OfficeHour::new(managed, metadata)?),
        SubPolicyKind::CoreRatio => SubPolicy::CoreRatio(CoreRatio::new(managed, metadata)?),
    })
}

/// Decode a metadata document. `null` decodes as an empty object so that
/// absent metadata reports the first missing field.
pub(crate) fn decode_metadata<T: DeserializeOwned>(policy: &str, metadata: &Value) -> PolicyResult<T> {
    let doc = if metadata.is_null() {
        Value::Object(Default::default())
    } else {
        metadata.clone()
    };
    serde_json::from_value(doc).map_err(|e| PolicyError::MetadataDecode {
        policy: policy.to_string(),
        reason: e.to_string(),
    })
}

pub(crate) fn required<T>(policy: &str, field: &str, value: Option<T>) -> PolicyResult<T> {
    value.ok_or_else(|| PolicyError::MissingMetadata {
        policy: policy.to_string(),
        field: field.to_string(),
    })
}

pub(crate) fn managed_names(managed: &[Arc<Resource>]) -> Vec<String> {
    managed.iter().map(|r| r.name().to_string()).collect()
}

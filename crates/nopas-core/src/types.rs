//! Persisted and wire types for nopas.
//!
//! Field names follow the PascalCase JSON layout the policy files and
//! the UI already use (`ScalingGroupName`, `ManagedResources`, ...).

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;

/// Name of a managed resource, unique within one `PolicyState`.
pub type ResourceName = String;

/// Instance or task-group count. Signed so that out-of-range requests
/// (negative, overflowing multiplications) survive until clamping.
pub type Count = i64;

/// Minutes in a day; the exclusive upper end of a schedule window.
pub const MINUTES_PER_DAY: u32 = 24 * 60;

// ── Bounds ────────────────────────────────────────────────────────

/// Operator-declared `[min, max]` safety rail for a resource's count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub min: Count,
    pub max: Count,
}

impl Bounds {
    pub fn new(min: Count, max: Count) -> Self {
        Self { min, max }
    }

    /// Bound `target` into `[min, max]`. Never fails.
    pub fn clamp(&self, target: Count) -> Count {
        if target > self.max {
            self.max
        } else if target < self.min {
            self.min
        } else {
            target
        }
    }

    pub fn contains(&self, count: Count) -> bool {
        self.min <= count && count <= self.max
    }

    /// Bounds are usable when `0 <= min <= max`.
    pub fn is_valid(&self) -> bool {
        0 <= self.min && self.min <= self.max
    }
}

// ── Plans ─────────────────────────────────────────────────────────

/// Reconstruction record for a resource. Never carries live state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "Kind")]
pub enum Plan {
    Ec2AutoScalingGroup(Ec2AutoScalingGroupPlan),
    NomadJob(NomadJobPlan),
}

impl Plan {
    pub fn bounds(&self) -> Bounds {
        match self {
            Plan::Ec2AutoScalingGroup(p) => Bounds::new(p.min_count, p.max_count),
            Plan::NomadJob(p) => Bounds::new(p.min_count, p.max_count),
        }
    }

    pub fn cooldowns(&self) -> &Cooldowns {
        match self {
            Plan::Ec2AutoScalingGroup(p) => &p.cooldowns,
            Plan::NomadJob(p) => &p.cooldowns,
        }
    }

    /// Short backend tag used in logs and events.
    pub fn kind(&self) -> &'static str {
        match self {
            Plan::Ec2AutoScalingGroup(_) => "ec2",
            Plan::NomadJob(_) => "nomad",
        }
    }
}

/// Plan for an AWS EC2 auto-scaling group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Ec2AutoScalingGroupPlan {
    pub scaling_group_name: String,
    pub region: String,
    pub max_count: Count,
    pub min_count: Count,
    #[serde(flatten)]
    pub cooldowns: Cooldowns,
}

/// Plan for a Nomad job's task group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NomadJobPlan {
    pub address: String,
    pub job_name: String,
    /// Secret-store path the Nomad ACL token is read from.
    pub nomad_path: String,
    pub max_count: Count,
    pub min_count: Count,
    /// Task group to scale. Required when the job has more than one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_group: Option<String>,
    #[serde(flatten)]
    pub cooldowns: Cooldowns,
}

/// Minimum time after a successful scale before the next scale in the
/// same direction. Duration strings as in `CheckingFreq`; absent means
/// no cooldown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cooldowns {
    #[serde(
        rename = "ScaleInCooldown",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub scale_in: Option<String>,
    #[serde(
        rename = "ScaleOutCooldown",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub scale_out: Option<String>,
}

impl Cooldowns {
    /// Cooldown applied after a scale-down.
    pub fn scale_in_duration(&self) -> Option<Duration> {
        self.scale_in.as_deref().and_then(parse_duration)
    }

    /// Cooldown applied after a scale-up.
    pub fn scale_out_duration(&self) -> Option<Duration> {
        self.scale_out.as_deref().and_then(parse_duration)
    }

    /// Name of the first field that is set but not a valid duration.
    pub fn invalid_field(&self) -> Option<&'static str> {
        if self.scale_in.is_some() && self.scale_in_duration().is_none() {
            return Some("ScaleInCooldown");
        }
        if self.scale_out.is_some() && self.scale_out_duration().is_none() {
            return Some("ScaleOutCooldown");
        }
        None
    }
}

// ── Sub-policies ──────────────────────────────────────────────────

/// Storage form of a sub-policy: kind name, managed resource names and
/// an untyped metadata document decoded by the matching variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct GenericSubPolicy {
    pub name: String,
    pub managed_resources: Vec<ResourceName>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// Half-open `[begin, end)` window in minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScalingWindow {
    pub begin: u32,
    pub end: u32,
    pub count: Count,
}

impl ScalingWindow {
    pub fn contains(&self, minute_of_day: u32) -> bool {
        self.begin <= minute_of_day && minute_of_day < self.end
    }

    pub fn is_valid(&self) -> bool {
        self.begin < self.end && self.end <= MINUTES_PER_DAY
    }
}

/// Change descriptor used by ratio-style policies.
///
/// `ChangeType` is kept as the raw string so unknown kinds survive a
/// decode/encode round trip; they apply as a no-op.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ScalingMagnitude {
    pub change_type: String,
    pub change_value: f64,
}

impl ScalingMagnitude {
    pub fn multiply(factor: f64) -> Self {
        Self {
            change_type: "multiply".to_string(),
            change_value: factor,
        }
    }

    pub fn until(count: Count) -> Self {
        Self {
            change_type: "until".to_string(),
            change_value: count as f64,
        }
    }

    /// Resolve the new desired count from `current`.
    ///
    /// Float results truncate toward zero; NaN becomes 0 and infinities
    /// saturate, leaving the final word to clamping.
    pub fn apply(&self, current: Count) -> Count {
        match self.change_type.as_str() {
            "multiply" => (current as f64 * self.change_value) as Count,
            "until" => self.change_value as Count,
            _ => current,
        }
    }
}

// ── Ensembler ─────────────────────────────────────────────────────

/// Merge rule for resources recommended by more than one sub-policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ensembler {
    /// Largest recommendation wins (biased against under-provisioning).
    #[default]
    Max,
    Min,
    /// Ceiling of the arithmetic mean.
    Mean,
}

impl Ensembler {
    /// Merge recommendations. `None` only for an empty slice.
    pub fn merge(&self, recommendations: &[Count]) -> Option<Count> {
        match self {
            Ensembler::Max => recommendations.iter().copied().max(),
            Ensembler::Min => recommendations.iter().copied().min(),
            Ensembler::Mean => {
                if recommendations.is_empty() {
                    return None;
                }
                let sum: i128 = recommendations.iter().map(|&c| c as i128).sum();
                let n = recommendations.len() as i128;
                // Ceiling division that also holds for negative sums.
                let mean = -((-sum).div_euclid(n));
                Some(mean.clamp(Count::MIN as i128, Count::MAX as i128) as Count)
            }
        }
    }
}

// ── Policy state ──────────────────────────────────────────────────

fn default_checking_freq() -> String {
    "1m".to_string()
}

/// Everything needed to rebuild the live policy after a restart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyState {
    /// Evaluation interval, e.g. "30s", "5m".
    #[serde(default = "default_checking_freq")]
    pub checking_freq: String,
    #[serde(default)]
    pub ensembler: Ensembler,
    #[serde(default)]
    pub resources: BTreeMap<ResourceName, Plan>,
    #[serde(default)]
    pub subpolicies: Vec<GenericSubPolicy>,
}

impl Default for PolicyState {
    fn default() -> Self {
        Self {
            checking_freq: default_checking_freq(),
            ensembler: Ensembler::default(),
            resources: BTreeMap::new(),
            subpolicies: Vec::new(),
        }
    }
}

impl PolicyState {
    pub fn from_json(bytes: &[u8]) -> anyhow::Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    pub fn to_json_pretty(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parsed `CheckingFreq`, if it is a valid non-zero duration.
    pub fn checking_interval(&self) -> Option<Duration> {
        parse_duration(&self.checking_freq).filter(|d| !d.is_zero())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamp_is_total_and_idempotent() {
        let bounds = Bounds::new(1, 5);
        for target in [-100, -1, 0, 1, 3, 5, 6, 1_000_000, Count::MIN, Count::MAX] {
            let once = bounds.clamp(target);
            assert!(bounds.contains(once), "{target} clamped to {once}");
            assert_eq!(bounds.clamp(once), once);
        }
    }

    #[test]
    fn clamp_keeps_in_range_values() {
        let bounds = Bounds::new(2, 8);
        for target in 2..=8 {
            assert_eq!(bounds.clamp(target), target);
        }
    }

    #[test]
    fn bounds_validity() {
        assert!(Bounds::new(0, 0).is_valid());
        assert!(Bounds::new(1, 5).is_valid());
        assert!(!Bounds::new(5, 1).is_valid());
        assert!(!Bounds::new(-1, 3).is_valid());
    }

    #[test]
    fn window_is_half_open() {
        let w = ScalingWindow { begin: 480, end: 1080, count: 10 };
        assert!(!w.contains(479));
        assert!(w.contains(480));
        assert!(w.contains(1079));
        assert!(!w.contains(1080));
    }

    #[test]
    fn window_validity() {
        assert!(ScalingWindow { begin: 0, end: 1440, count: 1 }.is_valid());
        assert!(!ScalingWindow { begin: 600, end: 600, count: 1 }.is_valid());
        assert!(!ScalingWindow { begin: 700, end: 600, count: 1 }.is_valid());
        assert!(!ScalingWindow { begin: 0, end: 1441, count: 1 }.is_valid());
    }

    #[test]
    fn magnitude_kinds() {
        assert_eq!(ScalingMagnitude::multiply(2.0).apply(3), 6);
        assert_eq!(ScalingMagnitude::multiply(0.5).apply(3), 1);
        assert_eq!(ScalingMagnitude::until(7).apply(3), 7);

        let unknown = ScalingMagnitude {
            change_type: "exponential".to_string(),
            change_value: 9.0,
        };
        assert_eq!(unknown.apply(3), 3);
    }

    #[test]
    fn magnitude_saturates_instead_of_panicking() {
        assert_eq!(ScalingMagnitude::multiply(f64::INFINITY).apply(2), Count::MAX);
        assert_eq!(ScalingMagnitude::multiply(f64::NAN).apply(2), 0);
    }

    #[test]
    fn ensembler_rules() {
        let recs = [2, 10, 3];
        assert_eq!(Ensembler::Max.merge(&recs), Some(10));
        assert_eq!(Ensembler::Min.merge(&recs), Some(2));
        assert_eq!(Ensembler::Mean.merge(&recs), Some(5));
        assert_eq!(Ensembler::Mean.merge(&[1, 2]), Some(2));
        assert_eq!(Ensembler::Mean.merge(&[-3, -2]), Some(-2));
        assert_eq!(Ensembler::Max.merge(&[]), None);
        assert_eq!(Ensembler::Mean.merge(&[]), None);
    }

    #[test]
    fn ensembler_defaults_to_max() {
        assert_eq!(Ensembler::default(), Ensembler::Max);
        let e: Ensembler = serde_json::from_str("\"mean\"").unwrap();
        assert_eq!(e, Ensembler::Mean);
    }

    #[test]
    fn plans_are_tagged_by_kind() {
        let json = r#"{
            "Kind": "NomadJob",
            "Address": "http://nomad:4646",
            "JobName": "worker",
            "NomadPath": "nomad/creds/worker",
            "MaxCount": 5,
            "MinCount": 1
        }"#;
        let plan: Plan = serde_json::from_str(json).unwrap();
        let Plan::NomadJob(nomad) = &plan else {
            panic!("expected nomad plan");
        };
        assert_eq!(nomad.job_name, "worker");
        assert_eq!(nomad.task_group, None);
        assert_eq!(plan.bounds(), Bounds::new(1, 5));

        let out = serde_json::to_value(&plan).unwrap();
        assert_eq!(out["Kind"], "NomadJob");
        assert!(out.get("TaskGroup").is_none());
        assert!(out.get("ScaleInCooldown").is_none());
    }

    #[test]
    fn plan_cooldowns_decode() {
        let json = r#"{
            "Kind": "Ec2AutoScalingGroup",
            "ScalingGroupName": "asg-web",
            "Region": "us-east-1",
            "MaxCount": 10,
            "MinCount": 1,
            "ScaleInCooldown": "10m",
            "ScaleOutCooldown": "90s"
        }"#;
        let plan: Plan = serde_json::from_str(json).unwrap();
        let cooldowns = plan.cooldowns();
        assert_eq!(cooldowns.scale_in_duration(), Some(Duration::from_secs(600)));
        assert_eq!(cooldowns.scale_out_duration(), Some(Duration::from_secs(90)));
        assert_eq!(cooldowns.invalid_field(), None);

        let out = serde_json::to_value(&plan).unwrap();
        assert_eq!(out["ScaleInCooldown"], "10m");
        assert_eq!(out["ScaleOutCooldown"], "90s");

        let bad = Cooldowns {
            scale_out: Some("later".to_string()),
            ..Cooldowns::default()
        };
        assert_eq!(bad.invalid_field(), Some("ScaleOutCooldown"));
    }

    #[test]
    fn policy_state_defaults() {
        let state: PolicyState = serde_json::from_str("{}").unwrap();
        assert_eq!(state.checking_freq, "1m");
        assert_eq!(state.ensembler, Ensembler::Max);
        assert_eq!(state.checking_interval(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn policy_state_parses_full_document() {
        let json = r#"{
            "CheckingFreq": "30s",
            "Ensembler": "min",
            "Resources": {
                "workers": {
                    "Kind": "Ec2AutoScalingGroup",
                    "ScalingGroupName": "asg-workers",
                    "Region": "ap-southeast-1",
                    "MaxCount": 10,
                    "MinCount": 2
                }
            },
            "Subpolicies": [{
                "Name": "DailySchedule",
                "ManagedResources": ["workers"],
                "Metadata": {"Default": 2, "Schedule": []}
            }]
        }"#;
        let state = PolicyState::from_json(json.as_bytes()).unwrap();
        assert_eq!(state.ensembler, Ensembler::Min);
        assert_eq!(state.resources.len(), 1);
        assert_eq!(state.subpolicies[0].managed_resources, vec!["workers"]);
        assert_eq!(state.checking_interval(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn zero_interval_is_rejected() {
        let state = PolicyState {
            checking_freq: "0s".to_string(),
            ..PolicyState::default()
        };
        assert_eq!(state.checking_interval(), None);
    }
}

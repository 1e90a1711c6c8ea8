//! The `Resource` wrapper shared by both backends.

use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::Mutex;

use nopas_core::{Bounds, Count, Plan};

use crate::ec2::Ec2AutoScalingGroup;
use crate::error::{ResourceError, ResourceResult};
use crate::factory::BackendFactory;
use crate::nomad::NomadJob;

/// Count before and after a verified scaling operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScaleOutcome {
    pub old: Count,
    pub new: Count,
}

impl ScaleOutcome {
    pub fn changed(&self) -> bool {
        self.old != self.new
    }
}

pub enum ResourceBackend {
    Ec2(Ec2AutoScalingGroup),
    Nomad(NomadJob),
}

/// A named, bounded resource. Scaling and restarts on one resource are
/// serialized; different resources proceed independently.
pub struct Resource {
    name: String,
    backend: ResourceBackend,
    scale_lock: Mutex<()>,
    scale_in_cooldown: Option<Duration>,
    scale_out_cooldown: Option<Duration>,
    /// When the count last changed through `apply_count`.
    last_scaled: std::sync::Mutex<Option<Instant>>,
}

/// Live resources keyed by name.
pub type ResourceSet = BTreeMap<String, Arc<Resource>>;

impl Resource {
    pub fn new(name: impl Into<String>, backend: ResourceBackend) -> Self {
        let plan = match &backend {
            ResourceBackend::Ec2(b) => Plan::Ec2AutoScalingGroup(b.to_plan()),
            ResourceBackend::Nomad(b) => Plan::NomadJob(b.to_plan()),
        };
        let cooldowns = plan.cooldowns();
        Self {
            name: name.into(),
            scale_in_cooldown: cooldowns.scale_in_duration(),
            scale_out_cooldown: cooldowns.scale_out_duration(),
            backend,
            scale_lock: Mutex::new(()),
            last_scaled: std::sync::Mutex::new(None),
        }
    }

    /// Rebuild a resource from its persisted plan.
    pub fn from_plan(name: &str, plan: &Plan, backends: &dyn BackendFactory) -> ResourceResult<Self> {
        validate_plan(name, plan)?;
        let call_timeout = backends.call_timeout();

        let backend = match plan {
            Plan::Ec2AutoScalingGroup(p) => {
                let api = backends.autoscaling(&p.region)?;
                ResourceBackend::Ec2(Ec2AutoScalingGroup::new(p.clone(), api, call_timeout))
            }
            Plan::NomadJob(p) => {
                let api = backends.nomad(&p.address)?;
                let secrets = backends.secrets()?;
                ResourceBackend::Nomad(NomadJob::new(p.clone(), api, secrets, call_timeout))
            }
        };

        Ok(Self::new(name, backend))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backend identity, e.g. `ec2:asg-workers@ap-southeast-1`.
    pub fn identity(&self) -> String {
        match &self.backend {
            ResourceBackend::Ec2(b) => b.identity(),
            ResourceBackend::Nomad(b) => b.identity(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match &self.backend {
            ResourceBackend::Ec2(_) => "ec2",
            ResourceBackend::Nomad(_) => "nomad",
        }
    }

    pub fn bounds(&self) -> Bounds {
        match &self.backend {
            ResourceBackend::Ec2(b) => b.bounds(),
            ResourceBackend::Nomad(b) => b.bounds(),
        }
    }

    pub async fn current_count(&self) -> ResourceResult<Count> {
        match &self.backend {
            ResourceBackend::Ec2(b) => b.current_count().await,
            ResourceBackend::Nomad(b) => b.current_count().await,
        }
    }

    /// Clamp `target` into bounds and apply it, verifying the result.
    pub async fn apply_count(&self, target: Count) -> ResourceResult<ScaleOutcome> {
        let _guard = self.scale_lock.lock().await;
        let outcome = match &self.backend {
            ResourceBackend::Ec2(b) => b.apply_count(target).await,
            ResourceBackend::Nomad(b) => b.apply_count(target).await,
        }?;
        if outcome.changed() {
            *self.last_scaled_slot() = Some(Instant::now());
        }
        Ok(outcome)
    }

    /// Time left before moving from `current` toward `target` is allowed.
    ///
    /// A scale-down waits out the scale-in cooldown and a scale-up the
    /// scale-out cooldown, both measured from the last change made by
    /// `apply_count`. `None` means the move may proceed now.
    pub fn cooldown_remaining(&self, current: Count, target: Count) -> Option<Duration> {
        let clamped = self.bounds().clamp(target);
        let cooldown = if clamped < current {
            self.scale_in_cooldown?
        } else if clamped > current {
            self.scale_out_cooldown?
        } else {
            return None;
        };

        let elapsed = (*self.last_scaled_slot())?.elapsed();
        cooldown.checked_sub(elapsed).filter(|left| !left.is_zero())
    }

    fn last_scaled_slot(&self) -> std::sync::MutexGuard<'_, Option<Instant>> {
        self.last_scaled.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Restart one running unit. Only Nomad jobs support this.
    pub async fn restart(&self) -> ResourceResult<String> {
        let _guard = self.scale_lock.lock().await;
        match &self.backend {
            ResourceBackend::Ec2(b) => Err(ResourceError::Unsupported {
                resource: b.identity(),
                operation: "restart".to_string(),
            }),
            ResourceBackend::Nomad(b) => b.restart().await,
        }
    }

    pub fn to_plan(&self) -> Plan {
        match &self.backend {
            ResourceBackend::Ec2(b) => Plan::Ec2AutoScalingGroup(b.to_plan()),
            ResourceBackend::Nomad(b) => Plan::NomadJob(b.to_plan()),
        }
    }
}

fn validate_plan(name: &str, plan: &Plan) -> ResourceResult<()> {
    let invalid = |reason: String| ResourceError::InvalidPlan {
        resource: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("resource name is empty".to_string()));
    }

    let bounds = plan.bounds();
    if !bounds.is_valid() {
        return Err(invalid(format!(
            "bounds must satisfy 0 <= MinCount <= MaxCount, got [{}, {}]",
            bounds.min, bounds.max
        )));
    }

    if let Some(field) = plan.cooldowns().invalid_field() {
        return Err(invalid(format!("{field} is not a valid duration")));
    }

    match plan {
        Plan::Ec2AutoScalingGroup(p) => {
            if p.scaling_group_name.is_empty() || p.region.is_empty() {
                return Err(invalid("ScalingGroupName and Region are required".to_string()));
            }
        }
        Plan::NomadJob(p) => {
            if p.address.is_empty() || p.job_name.is_empty() || p.nomad_path.is_empty() {
                return Err(invalid("Address, JobName and NomadPath are required".to_string()));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryBackends;
    use crate::nomad::JobSpec;
    use nopas_core::{Cooldowns, Ec2AutoScalingGroupPlan, NomadJobPlan};

    fn ec2_plan() -> Plan {
        Plan::Ec2AutoScalingGroup(Ec2AutoScalingGroupPlan {
            scaling_group_name: "asg-workers".to_string(),
            region: "ap-southeast-1".to_string(),
            max_count: 10,
            min_count: 2,
            cooldowns: Default::default(),
        })
    }

    fn nomad_plan() -> Plan {
        Plan::NomadJob(NomadJobPlan {
            address: "http://nomad:4646".to_string(),
            job_name: "worker".to_string(),
            nomad_path: "nomad/creds/worker".to_string(),
            max_count: 5,
            min_count: 1,
            task_group: Some("workers".to_string()),
            cooldowns: Default::default(),
        })
    }

    #[test]
    fn plan_round_trip_is_identity() {
        let backends = InMemoryBackends::new();
        for plan in [ec2_plan(), nomad_plan()] {
            let resource = Resource::from_plan("r", &plan, &backends).unwrap();
            assert_eq!(resource.to_plan(), plan);
            assert_eq!(resource.bounds(), plan.bounds());
            assert_eq!(resource.kind(), plan.kind());
        }
    }

    #[test]
    fn rejects_inverted_bounds() {
        let backends = InMemoryBackends::new();
        let plan = Plan::Ec2AutoScalingGroup(Ec2AutoScalingGroupPlan {
            scaling_group_name: "asg".to_string(),
            region: "us-east-1".to_string(),
            max_count: 1,
            min_count: 4,
            cooldowns: Default::default(),
        });
        let err = Resource::from_plan("r", &plan, &backends).err().unwrap();
        assert!(matches!(err, ResourceError::InvalidPlan { .. }));
    }

    #[test]
    fn rejects_empty_job_name() {
        let backends = InMemoryBackends::new();
        let plan = Plan::NomadJob(NomadJobPlan {
            address: "http://nomad:4646".to_string(),
            job_name: String::new(),
            nomad_path: "p".to_string(),
            max_count: 5,
            min_count: 1,
            task_group: None,
            cooldowns: Default::default(),
        });
        assert!(Resource::from_plan("r", &plan, &backends).is_err());
    }

    #[tokio::test]
    async fn ec2_restart_is_unsupported() {
        let backends = InMemoryBackends::new();
        let resource = Resource::from_plan("r", &ec2_plan(), &backends).unwrap();
        let err = resource.restart().await.unwrap_err();
        assert!(matches!(err, ResourceError::Unsupported { .. }));
    }

    #[tokio::test]
    async fn concurrent_applies_serialize() {
        let backends = InMemoryBackends::new();
        backends
            .nomad
            .add_job(JobSpec::single_group("worker", "workers", 1));
        let resource = Arc::new(Resource::from_plan("r", &nomad_plan(), &backends).unwrap());

        let a = tokio::spawn({
            let r = resource.clone();
            async move { r.apply_count(3).await }
        });
        let b = tokio::spawn({
            let r = resource.clone();
            async move { r.apply_count(4).await }
        });
        let a = a.await.unwrap().unwrap();
        let b = b.await.unwrap().unwrap();

        // Whichever ran second observed the first one's write.
        assert!(
            (a.old == 1 && b.old == 3) || (b.old == 1 && a.old == 4),
            "{a:?} {b:?}"
        );
        assert_eq!(backends.nomad.registrations().len(), 2);
    }

    fn ec2_with_cooldowns(scale_in: Option<&str>, scale_out: Option<&str>) -> Plan {
        Plan::Ec2AutoScalingGroup(Ec2AutoScalingGroupPlan {
            scaling_group_name: "asg-workers".to_string(),
            region: "ap-southeast-1".to_string(),
            max_count: 10,
            min_count: 2,
            cooldowns: Cooldowns {
                scale_in: scale_in.map(str::to_string),
                scale_out: scale_out.map(str::to_string),
            },
        })
    }

    #[test]
    fn rejects_unparseable_cooldown() {
        let backends = InMemoryBackends::new();
        let plan = ec2_with_cooldowns(Some("a while"), None);
        let err = Resource::from_plan("r", &plan, &backends).err().unwrap();
        assert!(
            matches!(&err, ResourceError::InvalidPlan { reason, .. } if reason.contains("ScaleInCooldown")),
            "{err}"
        );
    }

    #[tokio::test]
    async fn cooldown_starts_after_a_change() {
        let backends = InMemoryBackends::new();
        backends.autoscaling.set_group("asg-workers", 4);
        let plan = ec2_with_cooldowns(Some("1h"), None);
        let resource = Resource::from_plan("r", &plan, &backends).unwrap();

        // Never scaled yet: nothing to wait for.
        assert_eq!(resource.cooldown_remaining(4, 2), None);

        resource.apply_count(6).await.unwrap();
        let left = resource.cooldown_remaining(6, 3).unwrap();
        assert!(left > Duration::from_secs(3500), "{left:?}");

        // No scale-out cooldown configured, and equal counts never wait.
        assert_eq!(resource.cooldown_remaining(6, 8), None);
        assert_eq!(resource.cooldown_remaining(6, 6), None);
        // Clamping decides the direction: 50 clamps to 10, a scale-up.
        assert_eq!(resource.cooldown_remaining(6, 50), None);
        assert_eq!(resource.to_plan(), plan);
    }

    #[tokio::test]
    async fn unchanged_apply_does_not_start_cooldown() {
        let backends = InMemoryBackends::new();
        backends.autoscaling.set_group("asg-workers", 4);
        let resource =
            Resource::from_plan("r", &ec2_with_cooldowns(Some("1h"), Some("1h")), &backends).unwrap();

        let outcome = resource.apply_count(4).await.unwrap();
        assert!(!outcome.changed());
        assert_eq!(resource.cooldown_remaining(4, 2), None);
        assert_eq!(resource.cooldown_remaining(4, 8), None);
    }

    #[test]
    fn outcome_changed() {
        assert!(ScaleOutcome { old: 1, new: 3 }.changed());
        assert!(!ScaleOutcome { old: 3, new: 3 }.changed());
    }
}

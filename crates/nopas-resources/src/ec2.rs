//! EC2 auto-scaling group resource.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_autoscaling::Client;
use aws_sdk_autoscaling::config::{BehaviorVersion, Region, SharedCredentialsProvider};
use aws_sdk_autoscaling::error::DisplayErrorContext;
use tracing::{debug, info, warn};

use nopas_core::{Bounds, Count, Ec2AutoScalingGroupPlan};

use crate::error::{ResourceError, ResourceResult, bounded};
use crate::resource::ScaleOutcome;

/// The fields of a scaling group nopas reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupDescription {
    pub name: String,
    pub desired_capacity: Count,
}

/// The two auto-scaling calls nopas issues.
#[async_trait]
pub trait AutoScalingApi: Send + Sync {
    /// Describe groups matching `group_name` (the caller checks there is exactly one).
    async fn describe_groups(&self, group_name: &str) -> ResourceResult<Vec<GroupDescription>>;

    async fn set_desired_capacity(&self, group_name: &str, capacity: Count) -> ResourceResult<()>;
}

/// `AutoScalingApi` over the AWS SDK, built from an injected credentials provider.
pub struct AwsAutoScaling {
    client: Client,
}

impl AwsAutoScaling {
    pub fn new(region: &str, credentials: SharedCredentialsProvider) -> Self {
        let config = aws_sdk_autoscaling::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.to_string()))
            .credentials_provider(credentials)
            .build();
        Self {
            client: Client::from_conf(config),
        }
    }
}

#[async_trait]
impl AutoScalingApi for AwsAutoScaling {
    async fn describe_groups(&self, group_name: &str) -> ResourceResult<Vec<GroupDescription>> {
        let resp = self
            .client
            .describe_auto_scaling_groups()
            .auto_scaling_group_names(group_name)
            .send()
            .await
            .map_err(|e| ResourceError::unavailable(group_name, DisplayErrorContext(&e)))?;

        Ok(resp
            .auto_scaling_groups()
            .iter()
            .map(|group| GroupDescription {
                name: group.auto_scaling_group_name().unwrap_or_default().to_string(),
                desired_capacity: Count::from(group.desired_capacity().unwrap_or_default()),
            })
            .collect())
    }

    async fn set_desired_capacity(&self, group_name: &str, capacity: Count) -> ResourceResult<()> {
        let capacity = i32::try_from(capacity).map_err(|_| ResourceError::InvalidPlan {
            resource: group_name.to_string(),
            reason: format!("desired capacity {capacity} does not fit the AWS API"),
        })?;

        self.client
            .update_auto_scaling_group()
            .auto_scaling_group_name(group_name)
            .desired_capacity(capacity)
            .send()
            .await
            .map_err(|e| ResourceError::unavailable(group_name, DisplayErrorContext(&e)))?;
        Ok(())
    }
}

/// An EC2 auto-scaling group scaled through its desired capacity.
pub struct Ec2AutoScalingGroup {
    plan: Ec2AutoScalingGroupPlan,
    api: Arc<dyn AutoScalingApi>,
    call_timeout: Duration,
}

impl Ec2AutoScalingGroup {
    pub fn new(
        plan: Ec2AutoScalingGroupPlan,
        api: Arc<dyn AutoScalingApi>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            plan,
            api,
            call_timeout,
        }
    }

    pub fn identity(&self) -> String {
        format!("ec2:{}@{}", self.plan.scaling_group_name, self.plan.region)
    }

    pub fn bounds(&self) -> Bounds {
        Bounds::new(self.plan.min_count, self.plan.max_count)
    }

    pub async fn current_count(&self) -> ResourceResult<Count> {
        Ok(self.describe_one().await?.desired_capacity)
    }

    /// Clamp, read, write, re-read and verify.
    pub async fn apply_count(&self, target: Count) -> ResourceResult<ScaleOutcome> {
        let identity = self.identity();
        let group = &self.plan.scaling_group_name;
        let new_count = self.bounds().clamp(target);
        if new_count != target {
            debug!(backend = %identity, target, clamped = new_count, "target clamped");
        }

        let before = self.describe_one().await?;

        let write = async {
            bounded(
                self.call_timeout,
                &identity,
                self.api.set_desired_capacity(group, new_count),
            )
            .await?;
            self.describe_one().await
        };
        let after = match write.await {
            Ok(after) => after,
            Err(e) => {
                warn!(
                    backend = %identity,
                    old = before.desired_capacity,
                    intended = new_count,
                    error = %e,
                    "[scaling log] ASG name: {} Old: {}. New: unknown",
                    group,
                    before.desired_capacity
                );
                return Err(e);
            }
        };

        info!(
            backend = %identity,
            old = before.desired_capacity,
            new = after.desired_capacity,
            intended = new_count,
            "[scaling log] ASG name: {} Old: {}. New: {}",
            group,
            before.desired_capacity,
            after.desired_capacity
        );

        if after.desired_capacity != new_count {
            return Err(ResourceError::ScaleVerificationFailed {
                resource: identity,
                intended: new_count,
                observed: after.desired_capacity,
            });
        }

        Ok(ScaleOutcome {
            old: before.desired_capacity,
            new: after.desired_capacity,
        })
    }

    pub fn to_plan(&self) -> Ec2AutoScalingGroupPlan {
        self.plan.clone()
    }

    /// Describe the configured group; anything but exactly one match is an error.
    async fn describe_one(&self) -> ResourceResult<GroupDescription> {
        let identity = self.identity();
        let mut groups = bounded(
            self.call_timeout,
            &identity,
            self.api.describe_groups(&self.plan.scaling_group_name),
        )
        .await?;

        if groups.len() != 1 {
            return Err(ResourceError::UnexpectedTopology {
                resource: identity,
                expected: format!(
                    "exactly one scaling group named {}",
                    self.plan.scaling_group_name
                ),
                found: groups.len(),
            });
        }

        Ok(groups.remove(0))
    }
}

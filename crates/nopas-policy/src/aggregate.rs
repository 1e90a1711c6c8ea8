//! The policy aggregator.
//!
//! Owns the live resource set and the sub-policies over it. Each cycle
//! it collects every sub-policy's recommendations and merges those that
//! target the same resource with the configured [`Ensembler`].

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use nopas_core::{Count, Ensembler, PolicyState};
use nopas_resources::{BackendFactory, Resource, ResourceError, ResourceSet};

use crate::context::EvaluationContext;
use crate::error::PolicyError;
use crate::subpolicy::{SubPolicy, SubPolicyKind, create_subpolicy};

/// An entry of a `PolicyState` that could not be loaded.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LoadError {
    #[error("resource {name}: {error}")]
    Resource { name: String, error: ResourceError },

    #[error("sub-policy #{index} ({name}): {error}")]
    SubPolicy {
        index: usize,
        name: String,
        error: PolicyError,
    },
}

/// Result of one evaluation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Evaluation {
    /// Merged target per resource. Unclamped.
    pub targets: BTreeMap<String, Count>,
    /// Sub-policies skipped this cycle.
    pub errors: Vec<PolicyError>,
}

pub struct Policy {
    resources: ResourceSet,
    subpolicies: Vec<SubPolicy>,
    ensembler: Ensembler,
    checking_freq: String,
}

impl Policy {
    pub fn new(
        resources: ResourceSet,
        subpolicies: Vec<SubPolicy>,
        ensembler: Ensembler,
        checking_freq: impl Into<String>,
    ) -> Self {
        Self {
            resources,
            subpolicies,
            ensembler,
            checking_freq: checking_freq.into(),
        }
    }

    /// Rebuild the live policy from persisted state. Entries that fail to
    /// load are skipped and returned alongside the policy.
    pub fn from_state(state: &PolicyState, backends: &dyn BackendFactory) -> (Self, Vec<LoadError>) {
        let mut errors = Vec::new();

        let mut resources = ResourceSet::new();
        for (name, plan) in &state.resources {
            match Resource::from_plan(name, plan, backends) {
                Ok(resource) => {
                    debug!(resource = %name, identity = %resource.identity(), "resource loaded");
                    resources.insert(name.clone(), Arc::new(resource));
                }
                Err(error) => {
                    warn!(resource = %name, error = %error, "skipping resource");
                    errors.push(LoadError::Resource {
                        name: name.clone(),
                        error,
                    });
                }
            }
        }

        let mut subpolicies = Vec::new();
        for (index, generic) in state.subpolicies.iter().enumerate() {
            match create_subpolicy(generic, &resources) {
                Ok(policy) => subpolicies.push(policy),
                Err(error) => {
                    warn!(index, policy = %generic.name, error = %error, "skipping sub-policy");
                    errors.push(LoadError::SubPolicy {
                        index,
                        name: generic.name.clone(),
                        error,
                    });
                }
            }
        }

        info!(
            resources = resources.len(),
            subpolicies = subpolicies.len(),
            skipped = errors.len(),
            ensembler = ?state.ensembler,
            "policy loaded"
        );

        let policy = Self::new(
            resources,
            subpolicies,
            state.ensembler,
            state.checking_freq.clone(),
        );
        (policy, errors)
    }

    pub fn resources(&self) -> &ResourceSet {
        &self.resources
    }

    pub fn resource(&self, name: &str) -> Option<&Arc<Resource>> {
        self.resources.get(name)
    }

    pub fn subpolicies(&self) -> &[SubPolicy] {
        &self.subpolicies
    }

    pub fn ensembler(&self) -> Ensembler {
        self.ensembler
    }

    pub fn checking_interval(&self) -> Option<Duration> {
        nopas_core::parse_duration(&self.checking_freq).filter(|d| !d.is_zero())
    }

    /// Whether any loaded sub-policy consumes the core ratio signal.
    pub fn needs_core_ratio(&self) -> bool {
        self.subpolicies
            .iter()
            .any(|p| p.kind() == SubPolicyKind::CoreRatio)
    }

    /// Recommend, then merge per resource.
    pub fn evaluate(&self, ctx: &EvaluationContext) -> Evaluation {
        let mut recommendations: BTreeMap<String, Vec<Count>> = BTreeMap::new();
        let mut errors = Vec::new();

        for policy in &self.subpolicies {
            match policy.recommend(ctx) {
                Ok(recs) => {
                    for (resource, count) in recs {
                        recommendations.entry(resource).or_default().push(count);
                    }
                }
                Err(e) => {
                    warn!(policy = %policy.kind(), error = %e, "sub-policy skipped this cycle");
                    errors.push(e);
                }
            }
        }

        let targets = recommendations
            .into_iter()
            .filter_map(|(resource, recs)| {
                let target = self.ensembler.merge(&recs)?;
                if recs.len() > 1 {
                    debug!(
                        resource = %resource,
                        recommendations = ?recs,
                        target,
                        ensembler = ?self.ensembler,
                        "merged recommendations"
                    );
                }
                Some((resource, target))
            })
            .collect();

        Evaluation { targets, errors }
    }

    pub fn to_state(&self) -> PolicyState {
        PolicyState {
            checking_freq: self.checking_freq.clone(),
            ensembler: self.ensembler,
            resources: self
                .resources
                .iter()
                .map(|(name, r)| (name.clone(), r.to_plan()))
                .collect(),
            subpolicies: self.subpolicies.iter().map(SubPolicy::to_generic).collect(),
        }
    }
}

//! Reconciler: drive each resource toward its merged target.
//!
//! Resources are reconciled concurrently, one task each, so a slow or
//! failing backend only affects its own resource.

use std::collections::BTreeMap;

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use nopas_core::Count;
use nopas_resources::{ResourceError, ResourceSet};

#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileOutcome {
    /// The clamped target already matched; nothing was written.
    Unchanged { count: Count },
    Scaled { old: Count, new: Count },
    Failed(ResourceError),
}

/// Outcome of reconciling one resource.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconcileResult {
    pub resource: String,
    pub backend: String,
    /// Merged target before clamping.
    pub requested: Count,
    /// `requested` clamped into the resource's bounds.
    pub intended: Count,
    /// Count observed before any write, if it could be read.
    pub observed: Option<Count>,
    pub outcome: ReconcileOutcome,
}

impl ReconcileResult {
    pub fn is_failed(&self) -> bool {
        matches!(self.outcome, ReconcileOutcome::Failed(_))
    }
}

/// Reconcile every entry of `targets`.
///
/// `observed` holds counts read earlier in the cycle; resources missing
/// from it are read again. A move still inside the resource's cooldown
/// for that direction is reported as `Unchanged`. Results are sorted by
/// resource name.
pub async fn reconcile(
    resources: &ResourceSet,
    targets: &BTreeMap<String, Count>,
    observed: &BTreeMap<String, Count>,
) -> Vec<ReconcileResult> {
    let mut tasks = JoinSet::new();

    for (name, &requested) in targets {
        let Some(resource) = resources.get(name).cloned() else {
            warn!(resource = %name, "target for unknown resource ignored");
            continue;
        };
        let known = observed.get(name).copied();

        tasks.spawn(async move {
            let backend = resource.identity();
            let clamped = resource.bounds().clamp(requested);

            let current = match known {
                Some(count) => Ok(count),
                None => resource.current_count().await,
            };
            let current = match current {
                Ok(count) => count,
                Err(e) => {
                    return ReconcileResult {
                        resource: resource.name().to_string(),
                        backend,
                        requested,
                        intended: clamped,
                        observed: None,
                        outcome: ReconcileOutcome::Failed(e),
                    };
                }
            };

            let outcome = if current == clamped {
                ReconcileOutcome::Unchanged { count: current }
            } else if let Some(left) = resource.cooldown_remaining(current, clamped) {
                info!(
                    resource = %resource.name(),
                    backend = %backend,
                    current,
                    intended = clamped,
                    remaining_secs = left.as_secs(),
                    "in cooldown, not scaling"
                );
                ReconcileOutcome::Unchanged { count: current }
            } else {
                match resource.apply_count(requested).await {
                    Ok(scaled) => ReconcileOutcome::Scaled {
                        old: scaled.old,
                        new: scaled.new,
                    },
                    Err(e) => ReconcileOutcome::Failed(e),
                }
            };

            ReconcileResult {
                resource: resource.name().to_string(),
                backend,
                requested,
                intended: clamped,
                observed: Some(current),
                outcome,
            }
        });
    }

    let mut results = Vec::with_capacity(tasks.len());
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(result) => {
                log_result(&result);
                results.push(result);
            }
            Err(e) => error!(error = %e, "reconcile task panicked"),
        }
    }

    results.sort_by(|a, b| a.resource.cmp(&b.resource));
    results
}

fn log_result(result: &ReconcileResult) {
    match &result.outcome {
        ReconcileOutcome::Unchanged { count } => debug!(
            resource = %result.resource,
            backend = %result.backend,
            count,
            "already at target"
        ),
        ReconcileOutcome::Scaled { old, new } => info!(
            resource = %result.resource,
            backend = %result.backend,
            requested = result.requested,
            old,
            new,
            "resource scaled"
        ),
        ReconcileOutcome::Failed(e) => error!(
            resource = %result.resource,
            backend = %result.backend,
            requested = result.requested,
            intended = result.intended,
            old = ?result.observed,
            retryable = e.is_retryable(),
            error = %e,
            "reconcile failed"
        ),
    }
}

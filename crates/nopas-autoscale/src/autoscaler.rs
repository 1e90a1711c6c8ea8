//! Autoscaler: the periodic evaluation cycle.
//!
//! Each cycle reads live counts, builds an `EvaluationContext`, asks the
//! policy for merged targets, reconciles them and records one scaling
//! event per apply.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use nopas_core::Count;
use nopas_policy::{CoreRatioSource, EvaluationContext, Policy, PolicyError};
use nopas_resources::{ResourceError, ResourceSet};
use nopas_state::{EventOutcome, ScalingEvent, StateStore, epoch_ms};

use crate::reconciler::{ReconcileOutcome, ReconcileResult, reconcile};

pub const DEFAULT_EVENT_RETENTION: Duration = Duration::from_secs(7 * 24 * 3600);

/// Summary of one cycle.
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    pub targets: BTreeMap<String, Count>,
    pub results: Vec<ReconcileResult>,
    pub policy_errors: Vec<PolicyError>,
    /// Resources whose count could not be read at cycle start.
    pub read_errors: Vec<(String, ResourceError)>,
}

impl CycleReport {
    pub fn result(&self, resource: &str) -> Option<&ReconcileResult> {
        self.results.iter().find(|r| r.resource == resource)
    }

    pub fn scaled(&self) -> usize {
        self.results
            .iter()
            .filter(|r| matches!(r.outcome, ReconcileOutcome::Scaled { .. }))
            .count()
    }

    pub fn failed(&self) -> usize {
        self.results.iter().filter(|r| r.is_failed()).count()
    }
}

pub struct Autoscaler {
    policy: Arc<Policy>,
    store: StateStore,
    core_ratio: Option<Arc<dyn CoreRatioSource>>,
    utc_offset_minutes: i32,
    event_retention: Duration,
}

impl Autoscaler {
    pub fn new(policy: Arc<Policy>, store: StateStore) -> Self {
        Self {
            policy,
            store,
            core_ratio: None,
            utc_offset_minutes: 0,
            event_retention: DEFAULT_EVENT_RETENTION,
        }
    }

    pub fn with_core_ratio_source(mut self, source: Arc<dyn CoreRatioSource>) -> Self {
        self.core_ratio = Some(source);
        self
    }

    /// Offset from UTC used for time-of-day schedules.
    pub fn with_utc_offset(mut self, minutes: i32) -> Self {
        self.utc_offset_minutes = minutes;
        self
    }

    pub fn with_event_retention(mut self, retention: Duration) -> Self {
        self.event_retention = retention;
        self
    }

    pub fn policy(&self) -> &Arc<Policy> {
        &self.policy
    }

    /// Run one cycle at the current wall-clock time.
    pub async fn run_cycle(&self) -> CycleReport {
        self.run_cycle_with(EvaluationContext::now(self.utc_offset_minutes))
            .await
    }

    /// Run one cycle with `ctx` supplying the time of day. Counts and the
    /// core ratio are read live and merged into it.
    pub async fn run_cycle_with(&self, mut ctx: EvaluationContext) -> CycleReport {
        let resources = self.policy.resources();
        let (counts, read_errors) = read_counts(resources).await;
        ctx.current_counts.extend(counts);

        if self.policy.needs_core_ratio() {
            match &self.core_ratio {
                Some(source) => match source.core_ratio().await {
                    Ok(ratio) => {
                        debug!(?ratio, "core ratio read");
                        if ratio.is_some() {
                            ctx.core_ratio = ratio;
                        }
                    }
                    Err(e) => warn!(error = %e, "core ratio unavailable"),
                },
                None => warn!("CoreRatio policy loaded but no [signals] source configured"),
            }
        }

        let evaluation = self.policy.evaluate(&ctx);
        let results = reconcile(resources, &evaluation.targets, &ctx.current_counts).await;
        self.record(&results);

        let report = CycleReport {
            targets: evaluation.targets,
            results,
            policy_errors: evaluation.errors,
            read_errors,
        };

        info!(
            minute_of_day = ctx.minute_of_day,
            targets = report.targets.len(),
            scaled = report.scaled(),
            failed = report.failed(),
            policy_errors = report.policy_errors.len(),
            "cycle complete"
        );
        report
    }

    /// Persist one event per apply attempt; skipped resources are not recorded.
    fn record(&self, results: &[ReconcileResult]) {
        let at_ms = epoch_ms();
        for result in results {
            let (new, outcome) = match &result.outcome {
                ReconcileOutcome::Unchanged { .. } => continue,
                ReconcileOutcome::Scaled { old, new } if old == new => {
                    (Some(*new), EventOutcome::Unchanged)
                }
                ReconcileOutcome::Scaled { new, .. } => (Some(*new), EventOutcome::Applied),
                ReconcileOutcome::Failed(e) => (
                    None,
                    EventOutcome::Failed {
                        reason: e.to_string(),
                    },
                ),
            };
            let old = match &result.outcome {
                ReconcileOutcome::Scaled { old, .. } => Some(*old),
                _ => result.observed,
            };

            let event = ScalingEvent {
                resource: result.resource.clone(),
                backend: result.backend.clone(),
                requested: result.requested,
                old,
                new,
                outcome,
                at_ms,
            };
            if let Err(e) = self.store.put_event(&event) {
                warn!(resource = %result.resource, error = %e, "failed to record scaling event");
            }
        }
    }

    fn prune_events(&self) {
        let cutoff = epoch_ms().saturating_sub(self.event_retention.as_millis() as u64);
        match self.store.prune_events_before(cutoff) {
            Ok(0) => {}
            Ok(count) => debug!(count, "old scaling events pruned"),
            Err(e) => warn!(error = %e, "failed to prune scaling events"),
        }
    }

    /// Run the autoscaler loop. A cycle in progress completes before
    /// shutdown is observed.
    pub async fn run(&self, interval: Duration, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(
            interval_secs = interval.as_secs(),
            resources = self.policy.resources().len(),
            subpolicies = self.policy.subpolicies().len(),
            "autoscaler started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    self.run_cycle().await;
                    self.prune_events();
                }
                _ = shutdown.changed() => {
                    info!("autoscaler shutting down");
                    break;
                }
            }
        }
    }
}

/// Read every resource's count concurrently.
async fn read_counts(
    resources: &ResourceSet,
) -> (BTreeMap<String, Count>, Vec<(String, ResourceError)>) {
    let mut tasks = JoinSet::new();
    for (name, resource) in resources {
        let name = name.clone();
        let resource = resource.clone();
        tasks.spawn(async move { (name, resource.current_count().await) });
    }

    let mut counts = BTreeMap::new();
    let mut errors = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((name, Ok(count))) => {
                counts.insert(name, count);
            }
            Ok((name, Err(e))) => {
                warn!(resource = %name, error = %e, "count read failed");
                errors.push((name, e));
            }
            Err(e) => error!(error = %e, "count read task panicked"),
        }
    }
    errors.sort_by(|a, b| a.0.cmp(&b.0));
    (counts, errors)
}

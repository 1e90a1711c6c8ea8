//! In-memory backends.
//!
//! Used by tests across the workspace. Each fake records the writes it
//! receives and can inject the faults the real backends exhibit: missing
//! or duplicate entities, ignored writes, outages and slow calls.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use nopas_core::Count;

use crate::ec2::{AutoScalingApi, GroupDescription};
use crate::error::{ResourceError, ResourceResult};
use crate::factory::BackendFactory;
use crate::nomad::{Allocation, JobSpec, NomadApi};
use crate::secret::SecretStore;

async fn maybe_delay(delay: Option<Duration>) {
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
}

// ── Auto-scaling ──────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct AutoScalingFaults {
    /// Describe returns every group twice.
    pub duplicate_groups: bool,
    /// Writes succeed but do not change anything.
    pub ignore_writes: bool,
    /// Writes fail with `BackendUnavailable`; describes still work.
    pub reject_writes: bool,
    /// Every call fails with `BackendUnavailable`.
    pub unavailable: bool,
    pub delay: Option<Duration>,
}

#[derive(Default)]
struct AutoScalingInner {
    groups: BTreeMap<String, Count>,
    writes: Vec<(String, Count)>,
    faults: AutoScalingFaults,
}

#[derive(Default)]
pub struct InMemoryAutoScaling {
    inner: Mutex<AutoScalingInner>,
}

impl InMemoryAutoScaling {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_group(self, name: &str, desired: Count) -> Self {
        self.set_group(name, desired);
        self
    }

    /// Create or overwrite a group, as an out-of-band change would.
    pub fn set_group(&self, name: &str, desired: Count) {
        self.lock().groups.insert(name.to_string(), desired);
    }

    pub fn set_faults(&self, faults: AutoScalingFaults) {
        self.lock().faults = faults;
    }

    pub fn desired_capacity(&self, name: &str) -> Option<Count> {
        self.lock().groups.get(name).copied()
    }

    pub fn writes(&self) -> Vec<(String, Count)> {
        self.lock().writes.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, AutoScalingInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn faults(&self) -> AutoScalingFaults {
        self.lock().faults.clone()
    }
}

#[async_trait]
impl AutoScalingApi for InMemoryAutoScaling {
    async fn describe_groups(&self, group_name: &str) -> ResourceResult<Vec<GroupDescription>> {
        let faults = self.faults();
        maybe_delay(faults.delay).await;
        if faults.unavailable {
            return Err(ResourceError::unavailable(group_name, "injected outage"));
        }

        let inner = self.lock();
        let Some(&desired) = inner.groups.get(group_name) else {
            return Ok(Vec::new());
        };
        let group = GroupDescription {
            name: group_name.to_string(),
            desired_capacity: desired,
        };
        if faults.duplicate_groups {
            Ok(vec![group.clone(), group])
        } else {
            Ok(vec![group])
        }
    }

    async fn set_desired_capacity(&self, group_name: &str, capacity: Count) -> ResourceResult<()> {
        let faults = self.faults();
        maybe_delay(faults.delay).await;
        if faults.unavailable || faults.reject_writes {
            return Err(ResourceError::unavailable(group_name, "injected outage"));
        }

        let mut inner = self.lock();
        inner.writes.push((group_name.to_string(), capacity));
        if !faults.ignore_writes {
            inner.groups.insert(group_name.to_string(), capacity);
        }
        Ok(())
    }
}

// ── Nomad ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct NomadFaults {
    pub ignore_writes: bool,
    pub unavailable: bool,
    pub delay: Option<Duration>,
}

/// One `register_job` call as received.
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub job_name: String,
    /// Count of the first task group in the submitted spec.
    pub count: Option<Count>,
    pub token: String,
    pub vault_token: Option<String>,
}

#[derive(Default)]
struct NomadInner {
    jobs: BTreeMap<String, JobSpec>,
    allocations: BTreeMap<String, Vec<Allocation>>,
    registrations: Vec<Registration>,
    stopped: Vec<String>,
    faults: NomadFaults,
}

#[derive(Default)]
pub struct InMemoryNomad {
    inner: Mutex<NomadInner>,
}

impl InMemoryNomad {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_job(self, job: JobSpec) -> Self {
        self.add_job(job);
        self
    }

    /// Store a job under its `ID`.
    pub fn add_job(&self, job: JobSpec) {
        let id = job.0["ID"].as_str().unwrap_or_default().to_string();
        self.lock().jobs.insert(id, job);
    }

    pub fn with_allocation(self, job_name: &str, id: &str, task_group: &str, status: &str) -> Self {
        self.lock()
            .allocations
            .entry(job_name.to_string())
            .or_default()
            .push(Allocation {
                id: id.to_string(),
                client_status: status.to_string(),
                task_group: task_group.to_string(),
            });
        self
    }

    pub fn set_faults(&self, faults: NomadFaults) {
        self.lock().faults = faults;
    }

    pub fn task_group_count(&self, job_name: &str, index: usize) -> Option<Count> {
        self.lock().jobs.get(job_name)?.task_group_count(index)
    }

    pub fn registrations(&self) -> Vec<Registration> {
        self.lock().registrations.clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.lock().stopped.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NomadInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn enter(&self, label: &str) -> ResourceResult<NomadFaults> {
        let faults = self.lock().faults.clone();
        maybe_delay(faults.delay).await;
        if faults.unavailable {
            return Err(ResourceError::unavailable(label, "injected outage"));
        }
        Ok(faults)
    }
}

#[async_trait]
impl NomadApi for InMemoryNomad {
    async fn job(&self, job_name: &str, _token: &str) -> ResourceResult<Option<JobSpec>> {
        self.enter(job_name).await?;
        Ok(self.lock().jobs.get(job_name).cloned())
    }

    async fn register_job(&self, job: &JobSpec, token: &str) -> ResourceResult<()> {
        let job_name = job.0["ID"].as_str().unwrap_or_default().to_string();
        let faults = self.enter(&job_name).await?;

        let mut inner = self.lock();
        inner.registrations.push(Registration {
            job_name: job_name.clone(),
            count: job.task_group_count(0),
            token: token.to_string(),
            vault_token: job.vault_token().map(str::to_string),
        });
        if !faults.ignore_writes {
            inner.jobs.insert(job_name, job.clone());
        }
        Ok(())
    }

    async fn job_allocations(&self, job_name: &str, _token: &str) -> ResourceResult<Vec<Allocation>> {
        self.enter(job_name).await?;
        Ok(self
            .lock()
            .allocations
            .get(job_name)
            .cloned()
            .unwrap_or_default())
    }

    async fn stop_allocation(&self, alloc_id: &str, _token: &str) -> ResourceResult<()> {
        self.enter(alloc_id).await?;
        self.lock().stopped.push(alloc_id.to_string());
        Ok(())
    }
}

// ── Secrets ───────────────────────────────────────────────────────

/// Hands out `{prefix}-1`, `{prefix}-2`, ... so tests can tell whether a
/// token was fetched fresh.
pub struct StaticSecrets {
    prefix: String,
    fetches: AtomicUsize,
    failing: AtomicBool,
}

impl StaticSecrets {
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            fetches: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl SecretStore for StaticSecrets {
    async fn get_token(&self, path: &str) -> ResourceResult<String> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(ResourceError::Credential {
                path: path.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        let n = self.fetches.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("{}-{}", self.prefix, n))
    }

    async fn vault_token(&self) -> ResourceResult<String> {
        Ok(format!("vault-{}", self.prefix))
    }
}

// ── Factory ───────────────────────────────────────────────────────

/// `BackendFactory` over the fakes above. Regions without an explicit
/// fake share `autoscaling`; every Nomad address shares `nomad`.
pub struct InMemoryBackends {
    pub autoscaling: Arc<InMemoryAutoScaling>,
    pub nomad: Arc<InMemoryNomad>,
    pub secrets: Arc<StaticSecrets>,
    regions: Mutex<HashMap<String, Arc<InMemoryAutoScaling>>>,
    call_timeout: Duration,
}

impl Default for InMemoryBackends {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryBackends {
    pub fn new() -> Self {
        Self {
            autoscaling: Arc::new(InMemoryAutoScaling::new()),
            nomad: Arc::new(InMemoryNomad::new()),
            secrets: Arc::new(StaticSecrets::new("acl")),
            regions: Mutex::new(HashMap::new()),
            call_timeout: Duration::from_secs(1),
        }
    }

    pub fn with_call_timeout(mut self, call_timeout: Duration) -> Self {
        self.call_timeout = call_timeout;
        self
    }

    /// Route one region to its own fake.
    pub fn add_region(&self, region: &str, api: Arc<InMemoryAutoScaling>) {
        self.regions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(region.to_string(), api);
    }
}

impl BackendFactory for InMemoryBackends {
    fn autoscaling(&self, region: &str) -> ResourceResult<Arc<dyn AutoScalingApi>> {
        let regions = self.regions.lock().unwrap_or_else(PoisonError::into_inner);
        let api = regions
            .get(region)
            .cloned()
            .unwrap_or_else(|| self.autoscaling.clone());
        Ok(api)
    }

    fn nomad(&self, _address: &str) -> ResourceResult<Arc<dyn NomadApi>> {
        Ok(self.nomad.clone())
    }

    fn secrets(&self) -> ResourceResult<Arc<dyn SecretStore>> {
        Ok(self.secrets.clone())
    }

    fn call_timeout(&self) -> Duration {
        self.call_timeout
    }
}

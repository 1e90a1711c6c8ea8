//! Nomad job resource and HTTP client.
//!
//! Scaling a job means fetching its spec, changing one task group's
//! `Count`, attaching a fresh `VaultToken` and re-registering it. The
//! spec is kept as an opaque JSON document so fields nopas does not
//! know about survive the round trip.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use nopas_core::{Bounds, Count, NomadJobPlan};

use crate::error::{ResourceError, ResourceResult, bounded};
use crate::resource::ScaleOutcome;
use crate::secret::SecretStore;

const TOKEN_HEADER: &str = "X-Nomad-Token";

// ── Wire types ────────────────────────────────────────────────────

/// A Nomad job specification as returned by `GET /v1/job/:name`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobSpec(pub Value);

impl JobSpec {
    /// Minimal job with a single task group.
    pub fn single_group(job_name: &str, group: &str, count: Count) -> Self {
        JobSpec(json!({
            "ID": job_name,
            "Name": job_name,
            "TaskGroups": [{"Name": group, "Count": count}],
        }))
    }

    pub fn task_groups(&self) -> &[Value] {
        self.0["TaskGroups"]
            .as_array()
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn task_group_count(&self, index: usize) -> Option<Count> {
        self.task_groups().get(index)?["Count"].as_i64()
    }

    pub fn set_task_group_count(&mut self, index: usize, count: Count) {
        if let Some(group) = self.0["TaskGroups"].get_mut(index) {
            group["Count"] = json!(count);
        }
    }

    pub fn vault_token(&self) -> Option<&str> {
        self.0["VaultToken"].as_str()
    }

    pub fn set_vault_token(&mut self, token: &str) {
        if let Some(job) = self.0.as_object_mut() {
            job.insert("VaultToken".to_string(), json!(token));
        }
    }
}

/// Allocation stub from `GET /v1/job/:name/allocations`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "ClientStatus")]
    pub client_status: String,
    #[serde(rename = "TaskGroup", default)]
    pub task_group: String,
}

impl Allocation {
    pub fn is_running(&self) -> bool {
        self.client_status == "running"
    }
}

// ── API seam ──────────────────────────────────────────────────────

/// The Nomad calls nopas issues. Every call carries an ACL token.
#[async_trait]
pub trait NomadApi: Send + Sync {
    /// `Ok(None)` when no job with this name exists.
    async fn job(&self, job_name: &str, token: &str) -> ResourceResult<Option<JobSpec>>;

    async fn register_job(&self, job: &JobSpec, token: &str) -> ResourceResult<()>;

    async fn job_allocations(&self, job_name: &str, token: &str) -> ResourceResult<Vec<Allocation>>;

    /// Stop an allocation; Nomad reschedules it, making this a restart.
    async fn stop_allocation(&self, alloc_id: &str, token: &str) -> ResourceResult<()>;
}

/// `NomadApi` over the Nomad HTTP API.
pub struct NomadHttpClient {
    client: Client,
    address: String,
    base: Url,
}

impl NomadHttpClient {
    pub fn new(address: &str, timeout: Duration) -> ResourceResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ResourceError::unavailable(address, e))?;

        let base = Url::parse(address)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| ResourceError::InvalidPlan {
                resource: address.to_string(),
                reason: "Address is not an http(s) URL".to_string(),
            })?;

        Ok(Self {
            client,
            address: address.trim_end_matches('/').to_string(),
            base,
        })
    }

    /// Base address plus `segments`, each percent-encoded as one segment.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get_json(&self, segments: &[&str], token: &str) -> ResourceResult<Value> {
        let resp = self
            .client
            .get(self.url(segments))
            .header(TOKEN_HEADER, token)
            .send()
            .await
            .map_err(|e| ResourceError::unavailable(&self.address, e))?;
        let resp = check_status(resp, &self.address)?;
        resp.json()
            .await
            .map_err(|e| ResourceError::unavailable(&self.address, e))
    }

    /// Allocated CPU shares of running allocations divided by the CPU
    /// shares of all ready nodes. `None` when the cluster reports no CPU.
    pub async fn cluster_core_ratio(&self, token: &str) -> ResourceResult<Option<f64>> {
        let nodes = self.get_json(&["v1", "nodes"], token).await?;
        let mut total: i64 = 0;
        let mut allocated: i64 = 0;

        for node in nodes.as_array().map(Vec::as_slice).unwrap_or(&[]) {
            if node["Status"].as_str() != Some("ready") {
                continue;
            }
            let Some(node_id) = node["ID"].as_str() else {
                continue;
            };

            let detail = self.get_json(&["v1", "node", node_id], token).await?;
            total += detail["NodeResources"]["Cpu"]["CpuShares"]
                .as_i64()
                .or_else(|| detail["Resources"]["CPU"].as_i64())
                .unwrap_or(0);

            let allocs = self
                .get_json(&["v1", "node", node_id, "allocations"], token)
                .await?;
            for alloc in allocs.as_array().map(Vec::as_slice).unwrap_or(&[]) {
                if alloc["ClientStatus"].as_str() != Some("running") {
                    continue;
                }
                if let Some(tasks) = alloc["AllocatedResources"]["Tasks"].as_object() {
                    allocated += tasks
                        .values()
                        .filter_map(|task| task["Cpu"]["CpuShares"].as_i64())
                        .sum::<i64>();
                }
            }
        }

        debug!(allocated, total, "cluster cpu shares");
        if total <= 0 {
            return Ok(None);
        }
        Ok(Some(allocated as f64 / total as f64))
    }
}

fn check_status(resp: Response, label: &str) -> ResourceResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::FORBIDDEN || status == StatusCode::UNAUTHORIZED {
        return Err(ResourceError::Credential {
            path: label.to_string(),
            reason: format!("nomad returned {status}"),
        });
    }
    Err(ResourceError::unavailable(label, format!("nomad returned {status}")))
}

#[async_trait]
impl NomadApi for NomadHttpClient {
    async fn job(&self, job_name: &str, token: &str) -> ResourceResult<Option<JobSpec>> {
        let resp = self
            .client
            .get(self.url(&["v1", "job", job_name]))
            .header(TOKEN_HEADER, token)
            .send()
            .await
            .map_err(|e| ResourceError::unavailable(job_name, e))?;

        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = check_status(resp, job_name)?;
        let job = resp
            .json::<Value>()
            .await
            .map_err(|e| ResourceError::unavailable(job_name, e))?;
        Ok(Some(JobSpec(job)))
    }

    async fn register_job(&self, job: &JobSpec, token: &str) -> ResourceResult<()> {
        let label = job.0["ID"].as_str().unwrap_or("job");
        let resp = self
            .client
            .post(self.url(&["v1", "jobs"]))
            .header(TOKEN_HEADER, token)
            .json(&json!({ "Job": job }))
            .send()
            .await
            .map_err(|e| ResourceError::unavailable(label, e))?;
        check_status(resp, label)?;
        Ok(())
    }

    async fn job_allocations(&self, job_name: &str, token: &str) -> ResourceResult<Vec<Allocation>> {
        let allocs = self
            .get_json(&["v1", "job", job_name, "allocations"], token)
            .await?;
        serde_json::from_value(allocs).map_err(|e| ResourceError::unavailable(job_name, e))
    }

    async fn stop_allocation(&self, alloc_id: &str, token: &str) -> ResourceResult<()> {
        let resp = self
            .client
            .post(self.url(&["v1", "allocation", alloc_id, "stop"]))
            .header(TOKEN_HEADER, token)
            .send()
            .await
            .map_err(|e| ResourceError::unavailable(alloc_id, e))?;
        check_status(resp, alloc_id)?;
        Ok(())
    }
}

// ── Resource ──────────────────────────────────────────────────────

/// A task group of a Nomad job, scaled by re-registering the job.
pub struct NomadJob {
    plan: NomadJobPlan,
    api: Arc<dyn NomadApi>,
    secrets: Arc<dyn SecretStore>,
    call_timeout: Duration,
}

impl NomadJob {
    pub fn new(
        plan: NomadJobPlan,
        api: Arc<dyn NomadApi>,
        secrets: Arc<dyn SecretStore>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            plan,
            api,
            secrets,
            call_timeout,
        }
    }

    pub fn identity(&self) -> String {
        format!("nomad:{}@{}", self.plan.job_name, self.plan.address)
    }

    pub fn bounds(&self) -> Bounds {
        Bounds::new(self.plan.min_count, self.plan.max_count)
    }

    pub async fn current_count(&self) -> ResourceResult<Count> {
        let token = self.token().await?;
        let job = self.fetch_job(&token).await?;
        let (_, count) = self.read_count(&job)?;
        Ok(count)
    }

    /// Clamp, read, re-register with a fresh token, re-read and verify.
    pub async fn apply_count(&self, target: Count) -> ResourceResult<ScaleOutcome> {
        let identity = self.identity();
        let new_count = self.bounds().clamp(target);
        if new_count != target {
            debug!(backend = %identity, target, clamped = new_count, "target clamped");
        }

        let token = self.token().await?;
        let mut job = self.fetch_job(&token).await?;
        let (group, old_count) = self.read_count(&job)?;

        job.set_task_group_count(group, new_count);
        let observed = match self.register_and_read(&identity, &mut job, &token).await {
            Ok(observed) => observed,
            Err(e) => {
                warn!(
                    backend = %identity,
                    old = old_count,
                    intended = new_count,
                    error = %e,
                    "[scaling log] Nomad job: {}. Old: {}. New: unknown",
                    self.plan.job_name,
                    old_count
                );
                return Err(e);
            }
        };

        info!(
            backend = %identity,
            old = old_count,
            new = observed,
            intended = new_count,
            "[scaling log] Nomad job: {}. Old: {}. New: {}",
            self.plan.job_name,
            old_count,
            observed
        );

        if observed != new_count {
            return Err(ResourceError::ScaleVerificationFailed {
                resource: identity,
                intended: new_count,
                observed,
            });
        }

        Ok(ScaleOutcome {
            old: old_count,
            new: observed,
        })
    }

    /// Write the updated job and read back the scaled group's count.
    async fn register_and_read(
        &self,
        identity: &str,
        job: &mut JobSpec,
        token: &str,
    ) -> ResourceResult<Count> {
        let vault_token = bounded(self.call_timeout, identity, self.secrets.vault_token()).await?;
        job.set_vault_token(&vault_token);

        bounded(self.call_timeout, identity, self.api.register_job(job, token)).await?;

        let after = self.fetch_job(token).await?;
        let (_, observed) = self.read_count(&after)?;
        Ok(observed)
    }

    /// Stop one running allocation so Nomad reschedules it.
    /// Returns the stopped allocation ID.
    pub async fn restart(&self) -> ResourceResult<String> {
        let identity = self.identity();
        let token = self.token().await?;
        let allocs = bounded(
            self.call_timeout,
            &identity,
            self.api.job_allocations(&self.plan.job_name, &token),
        )
        .await?;

        let alloc = allocs
            .iter()
            .filter(|a| match &self.plan.task_group {
                Some(group) => &a.task_group == group,
                None => true,
            })
            .find(|a| a.is_running())
            .ok_or_else(|| ResourceError::NoRunningAllocation {
                resource: identity.clone(),
            })?;

        info!(backend = %identity, alloc = %alloc.id, "[restart log] stopping {}", alloc.id);
        bounded(
            self.call_timeout,
            &identity,
            self.api.stop_allocation(&alloc.id, &token),
        )
        .await?;

        Ok(alloc.id.clone())
    }

    pub fn to_plan(&self) -> NomadJobPlan {
        self.plan.clone()
    }

    async fn token(&self) -> ResourceResult<String> {
        bounded(
            self.call_timeout,
            &self.identity(),
            self.secrets.get_token(&self.plan.nomad_path),
        )
        .await
    }

    async fn fetch_job(&self, token: &str) -> ResourceResult<JobSpec> {
        let identity = self.identity();
        bounded(
            self.call_timeout,
            &identity,
            self.api.job(&self.plan.job_name, token),
        )
        .await?
        .ok_or_else(|| ResourceError::UnexpectedTopology {
            resource: identity,
            expected: format!("a job named {}", self.plan.job_name),
            found: 0,
        })
    }

    /// Locate the scaled task group and read its count.
    fn read_count(&self, job: &JobSpec) -> ResourceResult<(usize, Count)> {
        let groups = job.task_groups();
        let index = match &self.plan.task_group {
            Some(name) => {
                let matches: Vec<usize> = groups
                    .iter()
                    .enumerate()
                    .filter(|(_, g)| g["Name"].as_str() == Some(name.as_str()))
                    .map(|(i, _)| i)
                    .collect();
                if matches.len() != 1 {
                    return Err(ResourceError::UnexpectedTopology {
                        resource: self.identity(),
                        expected: format!("one task group named {name}"),
                        found: matches.len(),
                    });
                }
                matches[0]
            }
            None => {
                if groups.len() != 1 {
                    return Err(ResourceError::UnexpectedTopology {
                        resource: self.identity(),
                        expected: "exactly one task group".to_string(),
                        found: groups.len(),
                    });
                }
                0
            }
        };

        let count = job.task_group_count(index).ok_or_else(|| {
            ResourceError::unavailable(&self.identity(), "task group has no Count")
        })?;
        Ok((index, count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{InMemoryNomad, NomadFaults, StaticSecrets};
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn plan(min: Count, max: Count) -> NomadJobPlan {
        NomadJobPlan {
            address: "http://nomad:4646".to_string(),
            job_name: "worker".to_string(),
            nomad_path: "nomad/creds/worker".to_string(),
            max_count: max,
            min_count: min,
            task_group: None,
            cooldowns: Default::default(),
        }
    }

    fn job_resource(
        nomad: &Arc<InMemoryNomad>,
        secrets: &Arc<StaticSecrets>,
        plan: NomadJobPlan,
    ) -> NomadJob {
        NomadJob::new(plan, nomad.clone(), secrets.clone(), Duration::from_secs(1))
    }

    #[tokio::test]
    async fn scales_with_fresh_token() {
        let nomad = Arc::new(
            InMemoryNomad::new().with_job(JobSpec::single_group("worker", "workers", 1)),
        );
        let secrets = Arc::new(StaticSecrets::new("acl"));
        let job = job_resource(&nomad, &secrets, plan(1, 5));

        let outcome = job.apply_count(3).await.unwrap();
        assert_eq!(outcome, ScaleOutcome { old: 1, new: 3 });

        let registrations = nomad.registrations();
        assert_eq!(registrations.len(), 1);
        assert_eq!(registrations[0].count, Some(3));
        assert_eq!(registrations[0].token, "acl-1");
        assert_eq!(registrations[0].vault_token.as_deref(), Some("vault-acl"));
        assert_eq!(secrets.fetches(), 1);

        // A second apply fetches a new token.
        job.apply_count(4).await.unwrap();
        assert_eq!(nomad.registrations()[1].token, "acl-2");
    }

    #[tokio::test]
    async fn clamps_to_bounds() {
        let nomad = Arc::new(
            InMemoryNomad::new().with_job(JobSpec::single_group("worker", "workers", 2)),
        );
        let secrets = Arc::new(StaticSecrets::new("acl"));
        let job = job_resource(&nomad, &secrets, plan(1, 5));

        assert_eq!(job.apply_count(-3).await.unwrap().new, 1);
        assert_eq!(job.apply_count(99).await.unwrap().new, 5);
        assert_eq!(nomad.task_group_count("worker", 0), Some(5));
    }

    #[tokio::test]
    async fn missing_job_is_unexpected_topology() {
        let nomad = Arc::new(InMemoryNomad::new());
        let secrets = Arc::new(StaticSecrets::new("acl"));
        let job = job_resource(&nomad, &secrets, plan(1, 5));

        let err = job.apply_count(2).await.unwrap_err();
        assert!(matches!(err, ResourceError::UnexpectedTopology { found: 0, .. }));
        assert!(nomad.registrations().is_empty());
    }

    #[tokio::test]
    async fn multiple_groups_need_a_task_group() {
        let spec = JobSpec(json!({
            "ID": "worker",
            "TaskGroups": [
                {"Name": "web", "Count": 2},
                {"Name": "batch", "Count": 4},
            ],
        }));
        let nomad = Arc::new(InMemoryNomad::new().with_job(spec));
        let secrets = Arc::new(StaticSecrets::new("acl"));

        let unnamed = job_resource(&nomad, &secrets, plan(1, 5));
        let err = unnamed.current_count().await.unwrap_err();
        assert!(matches!(err, ResourceError::UnexpectedTopology { found: 2, .. }));

        let mut named_plan = plan(1, 5);
        named_plan.task_group = Some("batch".to_string());
        let named = job_resource(&nomad, &secrets, named_plan);
        assert_eq!(named.current_count().await.unwrap(), 4);

        named.apply_count(1).await.unwrap();
        assert_eq!(nomad.task_group_count("worker", 0), Some(2));
        assert_eq!(nomad.task_group_count("worker", 1), Some(1));
    }

    #[tokio::test]
    async fn ignored_register_fails_verification() {
        let nomad = Arc::new(
            InMemoryNomad::new().with_job(JobSpec::single_group("worker", "workers", 1)),
        );
        nomad.set_faults(NomadFaults {
            ignore_writes: true,
            ..Default::default()
        });
        let secrets = Arc::new(StaticSecrets::new("acl"));
        let job = job_resource(&nomad, &secrets, plan(1, 5));

        let err = job.apply_count(3).await.unwrap_err();
        assert!(matches!(
            err,
            ResourceError::ScaleVerificationFailed { intended: 3, observed: 1, .. }
        ));
    }

    #[tokio::test]
    async fn credential_failure_blocks_write() {
        let nomad = Arc::new(
            InMemoryNomad::new().with_job(JobSpec::single_group("worker", "workers", 1)),
        );
        let secrets = Arc::new(StaticSecrets::new("acl"));
        secrets.set_failing(true);
        let job = job_resource(&nomad, &secrets, plan(1, 5));

        let err = job.apply_count(3).await.unwrap_err();
        assert!(matches!(err, ResourceError::Credential { .. }));
        assert!(nomad.registrations().is_empty());
    }

    #[tokio::test]
    async fn restart_stops_first_running_allocation() {
        let nomad = Arc::new(
            InMemoryNomad::new()
                .with_job(JobSpec::single_group("worker", "workers", 2))
                .with_allocation("worker", "a-1", "workers", "complete")
                .with_allocation("worker", "a-2", "workers", "running")
                .with_allocation("worker", "a-3", "workers", "running"),
        );
        let secrets = Arc::new(StaticSecrets::new("acl"));
        let job = job_resource(&nomad, &secrets, plan(1, 5));

        assert_eq!(job.restart().await.unwrap(), "a-2");
        assert_eq!(nomad.stopped(), vec!["a-2".to_string()]);
    }

    #[tokio::test]
    async fn restart_without_running_allocation_fails() {
        let nomad = Arc::new(
            InMemoryNomad::new()
                .with_job(JobSpec::single_group("worker", "workers", 1))
                .with_allocation("worker", "a-1", "workers", "failed"),
        );
        let secrets = Arc::new(StaticSecrets::new("acl"));
        let job = job_resource(&nomad, &secrets, plan(1, 5));

        let err = job.restart().await.unwrap_err();
        assert!(matches!(err, ResourceError::NoRunningAllocation { .. }));
        assert!(nomad.stopped().is_empty());
    }

    #[test]
    fn job_spec_accessors() {
        let mut spec = JobSpec::single_group("worker", "workers", 2);
        assert_eq!(spec.task_group_count(0), Some(2));
        assert_eq!(spec.task_group_count(1), None);

        spec.set_task_group_count(0, 7);
        spec.set_vault_token("v-1");
        assert_eq!(spec.task_group_count(0), Some(7));
        assert_eq!(spec.vault_token(), Some("v-1"));
    }

    // ── HTTP client ──────────────────────────────────────────────

    fn http_client(server: &MockServer) -> NomadHttpClient {
        NomadHttpClient::new(&server.uri(), Duration::from_secs(2)).unwrap()
    }

    #[tokio::test]
    async fn http_job_not_found_is_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/job/ghost"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let client = http_client(&server);
        assert_eq!(client.job("ghost", "t").await.unwrap(), None);
    }

    #[tokio::test]
    async fn http_path_segments_are_encoded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/job/etl%2Fnightly%20run/allocations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/allocation/a%3Fx%2F1/stop"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        let client = http_client(&server);
        let allocs = client.job_allocations("etl/nightly run", "t").await.unwrap();
        assert!(allocs.is_empty());
        client.stop_allocation("a?x/1", "t").await.unwrap();
    }

    #[test]
    fn http_client_keeps_base_path() {
        let client = NomadHttpClient::new("http://nomad:4646/proxy/", Duration::from_secs(1)).unwrap();
        assert_eq!(
            client.url(&["v1", "job", "web"]).as_str(),
            "http://nomad:4646/proxy/v1/job/web"
        );
        assert!(NomadHttpClient::new("not a url", Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn http_register_wraps_job_and_sends_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/jobs"))
            .and(header("X-Nomad-Token", "acl-1"))
            .and(body_partial_json(json!({"Job": {"ID": "worker"}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"EvalID": "e"})))
            .expect(1)
            .mount(&server)
            .await;

        let client = http_client(&server);
        let spec = JobSpec::single_group("worker", "workers", 3);
        client.register_job(&spec, "acl-1").await.unwrap();
    }

    #[tokio::test]
    async fn http_forbidden_is_credential_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/job/worker"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let client = http_client(&server);
        let err = client.job("worker", "bad").await.unwrap_err();
        assert!(matches!(err, ResourceError::Credential { .. }));
    }

    #[tokio::test]
    async fn http_allocations_decode() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/job/worker/allocations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"ID": "a-1", "ClientStatus": "running", "TaskGroup": "workers", "JobID": "worker"},
                {"ID": "a-2", "ClientStatus": "pending", "TaskGroup": "workers"},
            ])))
            .mount(&server)
            .await;

        let client = http_client(&server);
        let allocs = client.job_allocations("worker", "t").await.unwrap();
        assert_eq!(allocs.len(), 2);
        assert!(allocs[0].is_running());
        assert!(!allocs[1].is_running());
    }

    #[tokio::test]
    async fn http_cluster_core_ratio() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/nodes"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"ID": "n1", "Status": "ready"},
                {"ID": "n2", "Status": "down"},
            ])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/node/n1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "NodeResources": {"Cpu": {"CpuShares": 4000}}
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/node/n1/allocations"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                {"ClientStatus": "running", "AllocatedResources": {"Tasks": {
                    "a": {"Cpu": {"CpuShares": 1000}},
                    "b": {"Cpu": {"CpuShares": 500}}
                }}},
                {"ClientStatus": "complete", "AllocatedResources": {"Tasks": {
                    "c": {"Cpu": {"CpuShares": 2000}}
                }}}
            ])))
            .mount(&server)
            .await;

        let client = http_client(&server);
        let ratio = client.cluster_core_ratio("t").await.unwrap().unwrap();
        assert!((ratio - 0.375).abs() < 1e-9);
    }
}

//! REST API handlers.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tracing::info;

use nopas_core::{Bounds, Plan};
use nopas_resources::ResourceError;

use crate::ApiState;

const DEFAULT_EVENT_LIMIT: usize = 50;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

fn not_found(name: &str) -> axum::response::Response {
    error_response(&format!("resource {name} not found"), StatusCode::NOT_FOUND).into_response()
}

/// Status for a backend failure surfaced through the API.
fn backend_status(e: &ResourceError) -> StatusCode {
    match e {
        ResourceError::Unsupported { .. } | ResourceError::InvalidPlan { .. } => {
            StatusCode::BAD_REQUEST
        }
        ResourceError::NoRunningAllocation { .. } => StatusCode::CONFLICT,
        _ => StatusCode::BAD_GATEWAY,
    }
}

/// GET /healthz
pub async fn healthz() -> impl IntoResponse {
    ApiResponse::ok("ok")
}

// ── Policy ─────────────────────────────────────────────────────

/// GET /api/v1/state
pub async fn get_state(State(state): State<ApiState>) -> impl IntoResponse {
    match state.store.get_policy() {
        Ok(Some(policy)) => ApiResponse::ok(policy).into_response(),
        Ok(None) => error_response("no policy stored", StatusCode::NOT_FOUND).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

// ── Resources ──────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct ResourceSummary {
    pub name: String,
    pub identity: String,
    pub kind: &'static str,
    pub bounds: Bounds,
    pub plan: Plan,
}

/// GET /api/v1/resources
pub async fn list_resources(State(state): State<ApiState>) -> impl IntoResponse {
    let summaries: Vec<ResourceSummary> = state
        .resources
        .values()
        .map(|r| ResourceSummary {
            name: r.name().to_string(),
            identity: r.identity(),
            kind: r.kind(),
            bounds: r.bounds(),
            plan: r.to_plan(),
        })
        .collect();
    ApiResponse::ok(summaries)
}

/// GET /api/v1/resources/:name/count
pub async fn get_count(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let Some(resource) = state.resources.get(&name) else {
        return not_found(&name);
    };
    match resource.current_count().await {
        Ok(count) => ApiResponse::ok(serde_json::json!({
            "resource": name,
            "count": count,
        }))
        .into_response(),
        Err(e) => error_response(&e.to_string(), backend_status(&e)).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<usize>,
}

/// GET /api/v1/resources/:name/events
pub async fn list_events(
    State(state): State<ApiState>,
    Path(name): Path<String>,
    Query(query): Query<EventsQuery>,
) -> impl IntoResponse {
    if !state.resources.contains_key(&name) {
        return not_found(&name);
    }
    let limit = query.limit.unwrap_or(DEFAULT_EVENT_LIMIT);
    match state.store.list_events_for_resource(&name, limit) {
        Ok(events) => ApiResponse::ok(events).into_response(),
        Err(e) => error_response(&e.to_string(), StatusCode::INTERNAL_SERVER_ERROR).into_response(),
    }
}

/// POST /api/v1/resources/:name/restart
pub async fn restart_resource(
    State(state): State<ApiState>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let Some(resource) = state.resources.get(&name) else {
        return not_found(&name);
    };
    match resource.restart().await {
        Ok(alloc_id) => {
            info!(resource = %name, alloc = %alloc_id, "restart requested via api");
            ApiResponse::ok(serde_json::json!({
                "resource": name,
                "stopped_allocation": alloc_id,
            }))
            .into_response()
        }
        Err(e) => error_response(&e.to_string(), backend_status(&e)).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use nopas_core::{Ec2AutoScalingGroupPlan, NomadJobPlan, PolicyState};
    use nopas_resources::memory::{AutoScalingFaults, InMemoryBackends};
    use nopas_resources::{JobSpec, Resource, ResourceSet};
    use nopas_state::{EventOutcome, ScalingEvent, StateStore};

    fn test_state(backends: &InMemoryBackends) -> ApiState {
        let web = Plan::Ec2AutoScalingGroup(Ec2AutoScalingGroupPlan {
            scaling_group_name: "asg-web".to_string(),
            region: "us-east-1".to_string(),
            max_count: 10,
            min_count: 1,
            cooldowns: Default::default(),
        });
        let worker = Plan::NomadJob(NomadJobPlan {
            address: "http://nomad:4646".to_string(),
            job_name: "worker".to_string(),
            nomad_path: "nomad/creds/worker".to_string(),
            max_count: 5,
            min_count: 1,
            task_group: None,
            cooldowns: Default::default(),
        });
        let resources: ResourceSet = [("web", web), ("worker", worker)]
            .into_iter()
            .map(|(name, plan)| {
                let resource = Resource::from_plan(name, &plan, backends).unwrap();
                (name.to_string(), Arc::new(resource))
            })
            .collect();

        ApiState {
            store: StateStore::open_in_memory().unwrap(),
            resources,
        }
    }

    #[tokio::test]
    async fn state_missing_then_present() {
        let state = test_state(&InMemoryBackends::new());

        let resp = get_state(State(state.clone())).await.into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        state.store.put_policy(&PolicyState::default()).unwrap();
        let resp = get_state(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn list_resources_ok() {
        let state = test_state(&InMemoryBackends::new());
        let resp = list_resources(State(state)).await.into_response();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn count_reads_backend() {
        let backends = InMemoryBackends::new();
        backends.autoscaling.set_group("asg-web", 4);
        let state = test_state(&backends);

        let resp = get_count(State(state.clone()), Path("web".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = get_count(State(state), Path("ghost".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn count_backend_failure_is_bad_gateway() {
        let backends = InMemoryBackends::new();
        backends.autoscaling.set_faults(AutoScalingFaults {
            unavailable: true,
            ..Default::default()
        });
        let state = test_state(&backends);

        let resp = get_count(State(state), Path("web".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn events_for_known_resource() {
        let state = test_state(&InMemoryBackends::new());
        state
            .store
            .put_event(&ScalingEvent {
                resource: "web".to_string(),
                backend: "ec2:asg-web@us-east-1".to_string(),
                requested: 3,
                old: Some(1),
                new: Some(3),
                outcome: EventOutcome::Applied,
                at_ms: 1_000,
            })
            .unwrap();

        let resp = list_events(
            State(state.clone()),
            Path("web".to_string()),
            Query(EventsQuery { limit: Some(5) }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = list_events(
            State(state),
            Path("ghost".to_string()),
            Query(EventsQuery { limit: None }),
        )
        .await
        .into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn restart_nomad_and_reject_ec2() {
        let backends = InMemoryBackends::new();
        backends
            .nomad
            .add_job(JobSpec::single_group("worker", "workers", 1));
        let state = test_state(&backends);

        // No allocations yet.
        let resp = restart_resource(State(state.clone()), Path("worker".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = restart_resource(State(state), Path("web".to_string()))
            .await
            .into_response();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}

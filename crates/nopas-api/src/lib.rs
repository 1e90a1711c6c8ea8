//! nopas-api: REST API for the nopas daemon.
//!
//! Read-mostly view over the persisted policy, the live resources and
//! their scaling history, plus the Nomad restart operation.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/healthz` | Liveness |
//! | GET | `/api/v1/state` | Persisted policy state |
//! | GET | `/api/v1/resources` | Live resources with bounds and plan |
//! | GET | `/api/v1/resources/{name}/count` | Live current count |
//! | GET | `/api/v1/resources/{name}/events` | Scaling history, newest first |
//! | POST | `/api/v1/resources/{name}/restart` | Restart one Nomad allocation |

pub mod handlers;

use axum::Router;
use axum::routing::{get, post};
use nopas_resources::ResourceSet;
use nopas_state::StateStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: StateStore,
    pub resources: ResourceSet,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/state", get(handlers::get_state))
        .route("/resources", get(handlers::list_resources))
        .route("/resources/{name}/count", get(handlers::get_count))
        .route("/resources/{name}/events", get(handlers::list_events))
        .route("/resources/{name}/restart", post(handlers::restart_resource))
        .with_state(state);

    Router::new()
        .route("/healthz", get(handlers::healthz))
        .nest("/api/v1", api_routes)
}

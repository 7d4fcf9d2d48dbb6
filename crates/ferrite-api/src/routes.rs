//! API route definitions.

use axum::{
    routing::{get, post, put},
    Router,
};
use std::sync::Arc;

use crate::handlers::{builds, health, jobs};
use crate::state::AppState;

/// Create the main API router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/builds/{id}", put(builds::update_build))
        .route(
            "/pipelines/{pipeline_id}/jobs/{job_name}/builds",
            post(jobs::trigger_job),
        )
        .route("/health", get(health::health))
        .with_state(state)
}

//! Job trigger handler.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use ferrite_core::build::Build;
use ferrite_core::ids::PipelineId;
use serde::Serialize;
use std::sync::Arc;

use crate::state::AppState;

#[derive(Serialize)]
pub struct BuildResponse {
    pub id: i32,
    pub job_id: i32,
    pub pipeline_id: i32,
    pub status: String,
}

impl From<&Build> for BuildResponse {
    fn from(build: &Build) -> Self {
        Self {
            id: build.id.as_i32(),
            job_id: build.job_id.as_i32(),
            pipeline_id: build.pipeline_id.as_i32(),
            status: build.status.as_str().to_string(),
        }
    }
}

/// `POST /pipelines/{pipeline_id}/jobs/{job_name}/builds`: create a build
/// now and let the detached trigger task scan, re-map, and start it. The
/// response carries the pending build without waiting for the task.
pub async fn trigger_job(
    State(state): State<Arc<AppState>>,
    Path((pipeline_id, job_name)): Path<(String, String)>,
) -> Result<(StatusCode, Json<BuildResponse>), (StatusCode, String)> {
    let pipeline: PipelineId = pipeline_id
        .parse::<i32>()
        .map(PipelineId)
        .map_err(|_| (StatusCode::BAD_REQUEST, "Invalid pipeline ID".to_string()))?;

    let config = state
        .config
        .get_pipeline_config(pipeline)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?
        .ok_or((StatusCode::NOT_FOUND, "Pipeline not found".to_string()))?;

    let job = config
        .job(&job_name)
        .ok_or((StatusCode::NOT_FOUND, "Job not found".to_string()))?;

    let (build, _waiter) = state
        .scheduler
        .trigger_immediately(pipeline, job, &config.resources, &config.resource_types)
        .await
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))?;

    Ok((StatusCode::CREATED, Json(BuildResponse::from(&build))))
}

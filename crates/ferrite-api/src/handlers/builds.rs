//! Build status callback from the execution engine.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use ferrite_core::build::{BuildStatus, ReportedVersion};
use ferrite_core::ids::BuildId;
use serde::Deserialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{error, info};

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct BuildReport {
    pub status: String,
    #[serde(default)]
    pub inputs: Vec<ReportedVersion>,
    #[serde(default)]
    pub outputs: Vec<ReportedVersion>,
}

/// `PUT /builds/{id}`: the engine reports a status transition, with the
/// input versions it consumed and the output versions it produced.
pub async fn update_build(
    State(state): State<Arc<AppState>>,
    Path(build_id): Path<String>,
    Json(report): Json<BuildReport>,
) -> StatusCode {
    let Ok(build_id) = build_id.parse::<i32>().map(BuildId) else {
        return StatusCode::BAD_REQUEST;
    };

    let Some(status) = BuildStatus::parse(&report.status) else {
        info!(build = %build_id, status = %report.status, "Unknown build status");
        return StatusCode::BAD_REQUEST;
    };

    // The engine only reports started and terminal statuses.
    if !matches!(
        status,
        BuildStatus::Started | BuildStatus::Succeeded | BuildStatus::Failed | BuildStatus::Errored
    ) {
        info!(build = %build_id, status = %report.status, "Unknown build status");
        return StatusCode::BAD_REQUEST;
    }

    if let Err(e) = state.builds.save_build_status(build_id, status).await {
        error!(build = %build_id, error = %e, "Failed to save build status");
        return StatusCode::INTERNAL_SERVER_ERROR;
    }

    match status {
        BuildStatus::Started => {
            for input in &report.inputs {
                if let Err(e) = state.builds.save_build_input(build_id, input).await {
                    error!(build = %build_id, input = %input.name, error = %e, "Failed to save build input");
                }
            }
        }
        BuildStatus::Succeeded => {
            let mut explicit: HashSet<&str> = HashSet::new();

            for output in &report.outputs {
                if let Err(e) = state.builds.save_build_output(build_id, output).await {
                    error!(build = %build_id, output = %output.name, error = %e, "Failed to save build output");
                }
                explicit.insert(output.name.as_str());
            }

            // Inputs the build did not explicitly re-emit pass through as
            // outputs, so downstream `passed` constraints see them. A failed
            // save forces a 500 but the remaining inputs are still attempted.
            let mut failed = false;
            for input in &report.inputs {
                if explicit.contains(input.name.as_str()) {
                    continue;
                }
                if let Err(e) = state.builds.save_build_output(build_id, input).await {
                    error!(build = %build_id, output = %input.name, error = %e, "Failed to save implicit build output");
                    failed = true;
                }
            }
            if failed {
                return StatusCode::INTERNAL_SERVER_ERROR;
            }
        }
        _ => {}
    }

    StatusCode::OK
}

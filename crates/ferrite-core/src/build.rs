//! Build types and the build status machine.

use crate::ids::{BuildId, JobId, PipelineId, ResourceId, VersionId};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Pending,
    Scheduled,
    Started,
    Succeeded,
    Failed,
    Errored,
    Aborted,
}

impl BuildStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildStatus::Succeeded
                | BuildStatus::Failed
                | BuildStatus::Errored
                | BuildStatus::Aborted
        )
    }

    /// Active builds count against a serial group's in-flight budget.
    pub fn is_active(&self) -> bool {
        matches!(self, BuildStatus::Scheduled | BuildStatus::Started)
    }

    /// Legal transitions: pending → scheduled → started → terminal, with
    /// aborts permitted from pending and scheduled.
    pub fn can_transition_to(&self, next: BuildStatus) -> bool {
        match (self, next) {
            (BuildStatus::Pending, BuildStatus::Scheduled) => true,
            (BuildStatus::Scheduled, BuildStatus::Started) => true,
            (BuildStatus::Started, s) if s.is_terminal() => true,
            (BuildStatus::Pending, BuildStatus::Aborted) => true,
            (BuildStatus::Scheduled, BuildStatus::Aborted) => true,
            // A build that never starts can still be finished as errored.
            (BuildStatus::Pending, BuildStatus::Errored) => true,
            (BuildStatus::Scheduled, BuildStatus::Errored) => true,
            _ => false,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BuildStatus::Pending => "pending",
            BuildStatus::Scheduled => "scheduled",
            BuildStatus::Started => "started",
            BuildStatus::Succeeded => "succeeded",
            BuildStatus::Failed => "failed",
            BuildStatus::Errored => "errored",
            BuildStatus::Aborted => "aborted",
        }
    }

    pub fn parse(s: &str) -> Option<BuildStatus> {
        match s {
            "pending" => Some(BuildStatus::Pending),
            "scheduled" => Some(BuildStatus::Scheduled),
            "started" => Some(BuildStatus::Started),
            "succeeded" => Some(BuildStatus::Succeeded),
            "failed" => Some(BuildStatus::Failed),
            "errored" => Some(BuildStatus::Errored),
            "aborted" => Some(BuildStatus::Aborted),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Build {
    pub id: BuildId,
    pub job_id: JobId,
    pub pipeline_id: PipelineId,
    pub status: BuildStatus,
}

/// A concrete input version a build consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct BuildInput {
    pub name: String,
    pub resource_id: ResourceId,
    pub version_id: VersionId,
    pub first_occurrence: bool,
}

/// One resolved input version inside a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct InputVersion {
    pub version_id: VersionId,
    pub first_occurrence: bool,
}

/// Mapping input-name → resolved version, ordered by input name so that
/// persistence and comparison are deterministic.
pub type InputMapping = BTreeMap<String, InputVersion>;

/// Execution plan handed to the engine. Opaque to the scheduler.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan(pub serde_json::Value);

/// An input or output version as reported by the execution engine in a
/// status callback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct ReportedVersion {
    pub name: String,
    pub version_id: VersionId,
}

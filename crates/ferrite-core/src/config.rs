//! Pipeline configuration types.
//!
//! These types represent the user-authored pipeline configuration as the
//! scheduler sees it: jobs with ordered inputs, resources with opaque source
//! parameters, and the serial-group / max-in-flight admission settings.

use crate::ids::VersionId;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PipelineConfig {
    pub name: String,
    #[serde(default)]
    pub jobs: Vec<JobConfig>,
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
    #[serde(default)]
    pub resource_types: Vec<ResourceTypeConfig>,
}

impl PipelineConfig {
    pub fn job(&self, name: &str) -> Option<&JobConfig> {
        self.jobs.iter().find(|j| j.name == name)
    }

    pub fn resource(&self, name: &str) -> Option<&ResourceConfig> {
        self.resources.iter().find(|r| r.name == name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobConfig {
    pub name: String,
    #[serde(default)]
    pub serial: bool,
    #[serde(default)]
    pub serial_groups: Vec<String>,
    #[serde(default)]
    pub max_in_flight: u32,
    #[serde(default)]
    pub inputs: Vec<JobInput>,
}

impl JobConfig {
    /// Effective in-flight budget: an explicit `max_in_flight` wins; a serial
    /// or serial-grouped job runs one at a time; otherwise unbounded (0).
    pub fn effective_max_in_flight(&self) -> u32 {
        if self.max_in_flight > 0 {
            self.max_in_flight
        } else if self.serial || !self.serial_groups.is_empty() {
            1
        } else {
            0
        }
    }

    /// Serial groups this job contends in. A serial job with no explicit
    /// groups forms a singleton group under its own name.
    pub fn effective_serial_groups(&self) -> Vec<String> {
        if !self.serial_groups.is_empty() {
            self.serial_groups.clone()
        } else if self.serial || self.max_in_flight > 0 {
            vec![self.name.clone()]
        } else {
            vec![]
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct JobInput {
    pub name: String,
    pub resource: String,
    /// Jobs whose builds must have produced the chosen version.
    #[serde(default)]
    pub passed: Vec<String>,
    /// A first occurrence of this input's version creates a pending build.
    #[serde(default)]
    pub trigger: bool,
    #[serde(default)]
    pub version: VersionConstraint,
}

/// Resolution mode for one input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum VersionConstraint {
    /// Most recent version satisfying all constraints.
    #[default]
    Latest,
    /// Walk forward one version at a time from the last one built.
    Every,
    /// Force a specific version.
    Pinned(VersionId),
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ResourceConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Source parameters, opaque to the scheduler.
    #[serde(default)]
    pub source: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ResourceTypeConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub resource_type: String,
    #[serde(default)]
    pub source: serde_json::Value,
}

//! Pipeline configuration fixtures.

use ferrite_core::config::{
    JobConfig, JobInput, PipelineConfig, ResourceConfig, VersionConstraint,
};

pub fn pipeline(name: &str, jobs: Vec<JobConfig>, resources: Vec<&str>) -> PipelineConfig {
    PipelineConfig {
        name: name.to_string(),
        jobs,
        resources: resources.into_iter().map(resource).collect(),
        resource_types: vec![],
    }
}

pub fn resource(name: &str) -> ResourceConfig {
    ResourceConfig {
        name: name.to_string(),
        resource_type: "git".to_string(),
        source: serde_json::json!({"uri": format!("git://{name}")}),
    }
}

pub fn job(name: &str, inputs: Vec<JobInput>) -> JobConfig {
    JobConfig {
        name: name.to_string(),
        serial: false,
        serial_groups: vec![],
        max_in_flight: 0,
        inputs,
    }
}

pub fn serial_job(name: &str, inputs: Vec<JobInput>) -> JobConfig {
    JobConfig {
        serial: true,
        ..job(name, inputs)
    }
}

pub fn input(name: &str, resource: &str) -> JobInput {
    JobInput {
        name: name.to_string(),
        resource: resource.to_string(),
        passed: vec![],
        trigger: false,
        version: VersionConstraint::Latest,
    }
}

pub fn trigger_input(name: &str, resource: &str) -> JobInput {
    JobInput {
        trigger: true,
        ..input(name, resource)
    }
}

pub fn passed_input(name: &str, resource: &str, passed: Vec<&str>) -> JobInput {
    JobInput {
        passed: passed.into_iter().map(str::to_string).collect(),
        ..input(name, resource)
    }
}

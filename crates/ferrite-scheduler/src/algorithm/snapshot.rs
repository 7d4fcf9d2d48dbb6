//! The versions snapshot.
//!
//! A read-only view of resource versions and build input/output history,
//! materialized once per scheduling tick and shared across the tick's work.
//! Disabled versions are filtered out at load time by the snapshot source.

use crate::algorithm::candidates::VersionCandidates;
use async_trait::async_trait;
use ferrite_core::ids::{BuildId, JobId, PipelineId, ResourceId, VersionId};
use ferrite_core::{Error, Result};
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceVersionRow {
    pub version_id: VersionId,
    pub resource_id: ResourceId,
    pub check_order: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildOutputRow {
    pub version_id: VersionId,
    pub resource_id: ResourceId,
    pub check_order: i64,
    pub build_id: BuildId,
    pub job_id: JobId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInputRow {
    pub version_id: VersionId,
    pub resource_id: ResourceId,
    pub check_order: i64,
    pub build_id: BuildId,
    pub job_id: JobId,
    pub input_name: String,
}

/// Immutable per-tick view of versions and build provenance.
#[derive(Debug, Default)]
pub struct VersionsSnapshot {
    pub resource_versions: Vec<ResourceVersionRow>,
    pub build_outputs: Vec<BuildOutputRow>,
    pub build_inputs: Vec<BuildInputRow>,
    pub job_ids: HashMap<String, JobId>,
    pub resource_ids: HashMap<String, ResourceId>,
}

impl VersionsSnapshot {
    pub fn job_id(&self, name: &str) -> Result<JobId> {
        self.job_ids
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownJob(name.to_string()))
    }

    pub fn resource_id(&self, name: &str) -> Result<ResourceId> {
        self.resource_ids
            .get(name)
            .copied()
            .ok_or_else(|| Error::UnknownResource(name.to_string()))
    }

    /// Every known version of the resource, without provenance.
    pub fn all_versions_for(&self, resource: ResourceId) -> VersionCandidates {
        let mut candidates = VersionCandidates::new();
        for row in &self.resource_versions {
            if row.resource_id == resource {
                candidates.add(row.version_id, row.check_order);
            }
        }
        candidates
    }

    /// Versions of the resource produced by at least one build of every job
    /// in `passed`: a set intersection joined by version identity, with the
    /// contributing builds kept as provenance.
    pub fn versions_of_resource_passed_jobs(
        &self,
        resource: ResourceId,
        passed: &BTreeSet<JobId>,
    ) -> VersionCandidates {
        let mut candidates: Option<VersionCandidates> = None;

        for &job in passed {
            let mut versions = VersionCandidates::new();
            for row in &self.build_outputs {
                if row.resource_id == resource && row.job_id == job {
                    versions.add_output(row.version_id, row.check_order, row.job_id, row.build_id);
                }
            }

            candidates = Some(match candidates {
                None => versions,
                Some(acc) => acc.intersect_by_version(&versions),
            });
        }

        candidates.unwrap_or_default()
    }

    /// True iff no prior build of `job` recorded `version` under `input_name`.
    pub fn is_first_occurrence(&self, version: VersionId, job: JobId, input_name: &str) -> bool {
        !self.build_inputs.iter().any(|row| {
            row.version_id == version && row.job_id == job && row.input_name == input_name
        })
    }

    /// The version consumed under `input_name` by the most recent build of
    /// `job`, with its `check_order`. Drives the `version: every` walk.
    pub fn latest_build_input_version(
        &self,
        job: JobId,
        input_name: &str,
    ) -> Option<(VersionId, i64)> {
        self.build_inputs
            .iter()
            .filter(|row| row.job_id == job && row.input_name == input_name)
            .max_by_key(|row| row.build_id)
            .map(|row| (row.version_id, row.check_order))
    }
}

/// Loads a fresh snapshot from the shared store.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    async fn load_versions_snapshot(&self, pipeline: PipelineId) -> Result<Arc<VersionsSnapshot>>;
}

//! Ordered version candidate sets with build provenance.
//!
//! `passed` constraints are set algebra: seeding a candidate set from the
//! outputs of upstream jobs, intersecting sets across jobs, and pruning by
//! the builds chosen for sibling inputs. Provenance must survive every
//! intersection so downstream inputs can narrow by specific upstream builds.

use ferrite_core::ids::{BuildId, JobId, VersionId};
use std::collections::{BTreeMap, BTreeSet};

/// One candidate version, carrying for each upstream job the set of builds
/// of that job which produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionEntry {
    pub version_id: VersionId,
    pub check_order: i64,
    pub passed: BTreeMap<JobId, BTreeSet<BuildId>>,
}

impl VersionEntry {
    /// True when the entry has no provenance for the job at all, or its
    /// builds for that job overlap the given set.
    fn passed_any(&self, job: JobId, builds: &BTreeSet<BuildId>) -> bool {
        match self.passed.get(&job) {
            None => true,
            Some(own) => own.iter().any(|b| builds.contains(b)),
        }
    }
}

/// Pins an input's candidates to versions whose provenance for `job`
/// overlaps the builds already chosen for a sibling input.
#[derive(Debug, Clone)]
struct ProvenanceConstraint {
    job: JobId,
    builds: BTreeSet<BuildId>,
}

/// An ordered set of candidate versions, most recent (highest `check_order`)
/// first. Constraints accumulate without rewriting the underlying entries;
/// iteration skips entries that fail any constraint.
#[derive(Debug, Clone, Default)]
pub struct VersionCandidates {
    versions: Vec<VersionEntry>,
    constraints: Vec<ProvenanceConstraint>,
    build_ids: BTreeMap<JobId, BTreeSet<BuildId>>,
}

impl VersionCandidates {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a version without provenance.
    pub fn add(&mut self, version_id: VersionId, check_order: i64) {
        self.merge(VersionEntry {
            version_id,
            check_order,
            passed: BTreeMap::new(),
        });
    }

    /// Add a version produced by `build` of `job`.
    pub fn add_output(&mut self, version_id: VersionId, check_order: i64, job: JobId, build: BuildId) {
        let mut passed = BTreeMap::new();
        passed.insert(job, BTreeSet::from([build]));
        self.merge(VersionEntry {
            version_id,
            check_order,
            passed,
        });
    }

    /// Merge an entry, keeping the `check_order`-descending order and
    /// unioning provenance when the version is already present.
    pub fn merge(&mut self, entry: VersionEntry) {
        for (job, builds) in &entry.passed {
            self.build_ids.entry(*job).or_default().extend(builds);
        }

        match self
            .versions
            .iter_mut()
            .find(|v| v.version_id == entry.version_id)
        {
            Some(existing) => {
                for (job, builds) in entry.passed {
                    existing.passed.entry(job).or_default().extend(builds);
                }
            }
            None => {
                let at = self
                    .versions
                    .partition_point(|v| v.check_order > entry.check_order);
                self.versions.insert(at, entry);
            }
        }
    }

    /// Inner join on version identity, unioning provenance from both sides.
    pub fn intersect_by_version(&self, other: &VersionCandidates) -> VersionCandidates {
        let mut intersected = VersionCandidates::new();
        for entry in &self.versions {
            if let Some(other_entry) = other
                .versions
                .iter()
                .find(|o| o.version_id == entry.version_id)
            {
                intersected.merge(other_entry.clone());
                intersected.merge(entry.clone());
            }
        }
        intersected
    }

    /// Retain only versions whose provenance for `job` overlaps `builds`.
    /// Versions with no provenance for `job` are unaffected.
    pub fn prune_to_builds_of(&self, job: JobId, builds: &BTreeSet<BuildId>) -> VersionCandidates {
        let mut pruned = self.clone();
        pruned.constraints.push(ProvenanceConstraint {
            job,
            builds: builds.clone(),
        });
        pruned
    }

    /// Restrict to a single version. The result carries no constraints; the
    /// caller is expected to have selected `version_id` through constrained
    /// iteration.
    pub fn for_version(&self, version_id: VersionId) -> VersionCandidates {
        let mut restricted = VersionCandidates::new();
        if let Some(entry) = self.versions.iter().find(|v| v.version_id == version_id) {
            restricted.merge(entry.clone());
        }
        restricted
    }

    /// Builds of `job` recorded across all entries.
    pub fn build_ids(&self, job: JobId) -> BTreeSet<BuildId> {
        self.build_ids.get(&job).cloned().unwrap_or_default()
    }

    /// Entries satisfying all accumulated constraints, most recent first.
    pub fn iter(&self) -> impl Iterator<Item = &VersionEntry> {
        self.versions
            .iter()
            .filter(|v| self.constraints.iter().all(|c| v.passed_any(c.job, &c.builds)))
    }

    /// Most recent entry satisfying all constraints.
    pub fn first(&self) -> Option<&VersionEntry> {
        self.iter().next()
    }

    pub fn is_empty(&self) -> bool {
        self.first().is_none()
    }
}

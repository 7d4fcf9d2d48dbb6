//! The input resolver.
//!
//! Recursive refinement over the job's inputs in stable name order: seed a
//! candidate set per input, then assign versions one input at a time, pruning
//! the remaining inputs by the provenance of each choice and backtracking on
//! dead ends. At every step the most recent version satisfying the current
//! constraints wins.

use crate::algorithm::candidates::VersionCandidates;
use crate::algorithm::snapshot::VersionsSnapshot;
use ferrite_core::build::{InputMapping, InputVersion};
use ferrite_core::config::{JobConfig, VersionConstraint};
use ferrite_core::ids::{JobId, ResourceId, VersionId};
use ferrite_core::Result;
use std::collections::BTreeSet;

/// The resolver's view of one input.
#[derive(Debug, Clone)]
pub struct InputConfig {
    pub name: String,
    pub resource_id: ResourceId,
    /// The job owning this input.
    pub job_id: JobId,
    pub passed: BTreeSet<JobId>,
    pub use_every_version: bool,
    pub pinned_version_id: Option<VersionId>,
}

/// Translate a job's configured inputs into resolver configs, in stable
/// order by input name. Fails on names the snapshot does not know.
pub fn algorithm_input_configs(
    job: &JobConfig,
    snapshot: &VersionsSnapshot,
) -> Result<Vec<InputConfig>> {
    let job_id = snapshot.job_id(&job.name)?;

    let mut configs = Vec::with_capacity(job.inputs.len());
    for input in &job.inputs {
        let resource_id = snapshot.resource_id(&input.resource)?;
        let mut passed = BTreeSet::new();
        for upstream in &input.passed {
            passed.insert(snapshot.job_id(upstream)?);
        }

        let (use_every_version, pinned_version_id) = match input.version {
            VersionConstraint::Latest => (false, None),
            VersionConstraint::Every => (true, None),
            VersionConstraint::Pinned(version) => (false, Some(version)),
        };

        configs.push(InputConfig {
            name: input.name.clone(),
            resource_id,
            job_id,
            passed,
            use_every_version,
            pinned_version_id,
        });
    }

    configs.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(configs)
}

/// Resolve all inputs jointly. Returns `None` when any input has no
/// candidate satisfying the accumulated constraints (a normal outcome).
pub fn resolve(configs: &[InputConfig], snapshot: &VersionsSnapshot) -> Option<InputMapping> {
    let mut seeded = Vec::with_capacity(configs.len());
    for config in configs {
        seeded.push(seed(config, snapshot)?);
    }

    let mut chosen = vec![None; configs.len()];
    if !assign(configs, snapshot, 0, seeded, &mut chosen) {
        return None;
    }

    let mut mapping = InputMapping::new();
    for (config, version) in configs.iter().zip(chosen) {
        let version_id = version?;
        mapping.insert(
            config.name.clone(),
            InputVersion {
                version_id,
                first_occurrence: snapshot.is_first_occurrence(
                    version_id,
                    config.job_id,
                    &config.name,
                ),
            },
        );
    }
    Some(mapping)
}

/// Seed one input's candidate set: a pin restricts to that single version,
/// `passed` seeds from the intersection of upstream outputs, and otherwise
/// every known version of the resource qualifies.
fn seed(config: &InputConfig, snapshot: &VersionsSnapshot) -> Option<VersionCandidates> {
    let base = if config.passed.is_empty() {
        snapshot.all_versions_for(config.resource_id)
    } else {
        snapshot.versions_of_resource_passed_jobs(config.resource_id, &config.passed)
    };

    let candidates = match config.pinned_version_id {
        Some(pinned) => base.for_version(pinned),
        None => base,
    };

    if candidates.is_empty() {
        return None;
    }
    Some(candidates)
}

/// Assign a version to input `index`, propagate its provenance into every
/// sibling sharing an upstream job, and recurse; on a dead end, move to the
/// input's next candidate.
fn assign(
    configs: &[InputConfig],
    snapshot: &VersionsSnapshot,
    index: usize,
    candidates: Vec<VersionCandidates>,
    chosen: &mut Vec<Option<VersionId>>,
) -> bool {
    if index == configs.len() {
        return true;
    }

    let config = &configs[index];
    for version_id in candidate_order(config, &candidates[index], snapshot) {
        let mut narrowed = candidates.clone();
        narrowed[index] = candidates[index].for_version(version_id);

        let mut dead = false;
        for &job in &config.passed {
            let builds = narrowed[index].build_ids(job);
            for (sibling, sibling_config) in configs.iter().enumerate() {
                if sibling == index || !sibling_config.passed.contains(&job) {
                    continue;
                }
                narrowed[sibling] = narrowed[sibling].prune_to_builds_of(job, &builds);
                if narrowed[sibling].is_empty() {
                    dead = true;
                    break;
                }
            }
            if dead {
                break;
            }
        }
        if dead {
            continue;
        }

        chosen[index] = Some(version_id);
        if assign(configs, snapshot, index + 1, narrowed, chosen) {
            return true;
        }
        chosen[index] = None;
    }

    false
}

/// The order in which an input's candidates are tried.
///
/// `version: latest` (and pins, already narrowed to one version) walk from
/// the most recent candidate down. `version: every` with a prior build walks
/// forward from the version that build used, oldest unconsumed first, and
/// holds at the latest used version when nothing newer remains.
fn candidate_order(
    config: &InputConfig,
    candidates: &VersionCandidates,
    snapshot: &VersionsSnapshot,
) -> Vec<VersionId> {
    if config.use_every_version {
        if let Some((last_used, last_order)) =
            snapshot.latest_build_input_version(config.job_id, &config.name)
        {
            let mut forward: Vec<VersionId> = candidates
                .iter()
                .filter(|entry| entry.check_order > last_order)
                .filter(|entry| {
                    snapshot.is_first_occurrence(entry.version_id, config.job_id, &config.name)
                })
                .map(|entry| entry.version_id)
                .collect();
            forward.reverse();

            if !forward.is_empty() {
                return forward;
            }
            if candidates.iter().any(|entry| entry.version_id == last_used) {
                return vec![last_used];
            }
        }
    }

    candidates.iter().map(|entry| entry.version_id).collect()
}

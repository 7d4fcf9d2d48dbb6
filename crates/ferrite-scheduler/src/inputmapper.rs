//! Input mapping persistence.
//!
//! Two passes per job: each input resolved in isolation (the independent
//! mapping, which drives diagnostics), then all inputs resolved jointly (the
//! next mapping, which feeds builds). A job whose inputs cannot all resolve
//! gets its stale next mapping deleted so no build runs with a partial set.

use crate::algorithm::{self, VersionsSnapshot};
use ferrite_core::build::InputMapping;
use ferrite_core::config::JobConfig;
use ferrite_core::ids::JobId;
use ferrite_core::ports::MappingStore;
use ferrite_core::Result;
use std::sync::Arc;
use tracing::debug;

pub struct InputMapper {
    mappings: Arc<dyn MappingStore>,
}

impl InputMapper {
    pub fn new(mappings: Arc<dyn MappingStore>) -> Self {
        Self { mappings }
    }

    /// Resolve and persist the job's mappings. Returns the next mapping when
    /// every input resolved jointly, `None` otherwise.
    pub async fn save_next_input_mapping(
        &self,
        snapshot: &VersionsSnapshot,
        job_id: JobId,
        job: &JobConfig,
    ) -> Result<Option<InputMapping>> {
        let input_configs = algorithm::algorithm_input_configs(job, snapshot)?;

        let mut independent = InputMapping::new();
        for config in &input_configs {
            if let Some(single) = algorithm::resolve(std::slice::from_ref(config), snapshot) {
                if let Some(version) = single.get(&config.name) {
                    independent.insert(config.name.clone(), *version);
                }
            }
        }

        self.mappings
            .save_independent_input_mapping(job_id, &independent)
            .await?;

        if independent.len() < input_configs.len() {
            // A pinned version may have vanished; never leave a next mapping
            // behind that no longer covers every input.
            debug!(job = %job.name, "input-has-no-candidates");
            self.mappings.delete_next_input_mapping(job_id).await?;
            return Ok(None);
        }

        match algorithm::resolve(&input_configs, snapshot) {
            Some(mapping) => {
                self.mappings
                    .save_next_input_mapping(job_id, &mapping)
                    .await?;
                Ok(Some(mapping))
            }
            None => {
                debug!(job = %job.name, "inputs-unresolved");
                self.mappings.delete_next_input_mapping(job_id).await?;
                Ok(None)
            }
        }
    }
}

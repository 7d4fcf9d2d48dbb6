//! Admission control and the `pending → scheduled → started` transition.
//!
//! The starter drains a job's pending builds one at a time. Each iteration
//! runs a gated pipeline; a gate that comes up false ends the drain cleanly
//! with nothing started, while store errors propagate to the tick.

use ferrite_core::build::{Build, BuildInput, BuildStatus};
use ferrite_core::config::{JobConfig, ResourceConfig, ResourceTypeConfig};
use ferrite_core::ids::{BuildId, JobId, PipelineId};
use ferrite_core::ports::{BuildStore, Engine, JobStore, MappingStore, PlanFactory};
use ferrite_core::Result;
use ferrite_db::LeaseService;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

pub struct BuildStarter {
    builds: Arc<dyn BuildStore>,
    mappings: Arc<dyn MappingStore>,
    jobs: Arc<dyn JobStore>,
    factory: Arc<dyn PlanFactory>,
    engine: Arc<dyn Engine>,
    leases: LeaseService,
}

impl BuildStarter {
    pub fn new(
        builds: Arc<dyn BuildStore>,
        mappings: Arc<dyn MappingStore>,
        jobs: Arc<dyn JobStore>,
        factory: Arc<dyn PlanFactory>,
        engine: Arc<dyn Engine>,
        leases: LeaseService,
    ) -> Self {
        Self {
            builds,
            mappings,
            jobs,
            factory,
            engine,
            leases,
        }
    }

    /// Start every pending build of the job that admission control lets
    /// through, oldest first.
    pub async fn try_start_all_pending_builds(
        &self,
        pipeline: PipelineId,
        job_id: JobId,
        job: &JobConfig,
        resources: &[ResourceConfig],
        resource_types: &[ResourceTypeConfig],
    ) -> Result<()> {
        loop {
            let started = self
                .try_start_next_pending_build(pipeline, job_id, job, resources, resource_types)
                .await?;
            if !started {
                return Ok(());
            }
        }
    }

    async fn try_start_next_pending_build(
        &self,
        pipeline: PipelineId,
        job_id: JobId,
        job: &JobConfig,
        resources: &[ResourceConfig],
        resource_types: &[ResourceTypeConfig],
    ) -> Result<bool> {
        let Some(next_pending) = self.builds.get_next_pending_build(job_id).await? else {
            return Ok(false);
        };

        let reached = self
            .is_max_in_flight_reached(job_id, job, next_pending.id)
            .await?;
        self.jobs.set_max_in_flight_reached(job_id, reached).await?;
        if reached {
            return Ok(false);
        }

        let Some(inputs) = self.mappings.get_next_build_inputs(job_id).await? else {
            return Ok(false);
        };

        if self.jobs.is_pipeline_paused(pipeline).await? {
            return Ok(false);
        }

        let saved_job = self.jobs.get_job(job_id).await?;
        if saved_job.paused {
            return Ok(false);
        }

        let lease = self.leases.build_scheduling(next_pending.id);
        if !lease.acquire().await? {
            debug!(build = %next_pending.id, "Build is being scheduled elsewhere");
            return Ok(false);
        }

        let result = self
            .schedule_and_start(&next_pending, job, resources, resource_types, &inputs)
            .await;

        if let Err(e) = lease.release().await {
            warn!(build = %next_pending.id, error = %e, "Failed to release build scheduling lease");
        }

        result
    }

    /// Steps 5–9 of an iteration: the CAS to scheduled, freezing inputs,
    /// plan creation, and the engine handoff. The CAS is the exactly-once
    /// authority across processes.
    async fn schedule_and_start(
        &self,
        build: &Build,
        job: &JobConfig,
        resources: &[ResourceConfig],
        resource_types: &[ResourceTypeConfig],
        inputs: &[BuildInput],
    ) -> Result<bool> {
        if !self.builds.update_build_to_scheduled(build.id).await? {
            debug!(build = %build.id, "Build already scheduled");
            return Ok(false);
        }

        self.builds.use_inputs_for_build(build.id, inputs).await?;

        let plan = match self.factory.create(job, resources, resource_types, inputs) {
            Ok(plan) => plan,
            Err(e) => {
                error!(build = %build.id, error = %e, "Failed to create build plan");
                // The build never started, so finish it directly instead of
                // running it through the failure path.
                if let Err(e) = self
                    .builds
                    .finish_build(build.id, build.pipeline_id, BuildStatus::Errored)
                    .await
                {
                    error!(build = %build.id, error = %e, "Failed to mark build as errored");
                }
                return Ok(false);
            }
        };

        let engine_build = match self.engine.create_build(build, plan).await {
            Ok(engine_build) => engine_build,
            Err(e) => {
                // Non-fatal: the build stays scheduled and a later tick
                // retries the drain.
                error!(build = %build.id, error = %e, "Failed to create engine build");
                return Ok(false);
            }
        };

        info!(build = %build.id, job = %job.name, "Starting build");
        tokio::spawn(async move { engine_build.resume().await });

        Ok(true)
    }

    /// Serial-group discipline: the group's in-flight budget must have room,
    /// and only the oldest pending build across the group may start.
    async fn is_max_in_flight_reached(
        &self,
        job_id: JobId,
        job: &JobConfig,
        build_id: BuildId,
    ) -> Result<bool> {
        let max_in_flight = job.effective_max_in_flight();
        if max_in_flight == 0 {
            return Ok(false);
        }

        let serial_groups = job.effective_serial_groups();

        let running = self
            .builds
            .get_running_builds_by_serial_group(job_id, &serial_groups)
            .await?;
        if running.len() >= max_in_flight as usize {
            return Ok(true);
        }

        let Some(next_most_pending) = self
            .builds
            .get_next_pending_build_by_serial_group(job_id, &serial_groups)
            .await?
        else {
            // Another job in the group will schedule it.
            debug!(job = %job.name, "Pending build disappeared from serial group");
            return Ok(true);
        };

        Ok(next_most_pending.id != build_id)
    }
}

//! Per-tick scheduling and the trigger-immediately path.
//!
//! One tick per pipeline: take the scheduling lease, snapshot versions, and
//! for each job map inputs, ensure a pending build on a triggering first
//! occurrence, and drain startable pending builds. Different pipelines hold
//! different leases and schedule in parallel; within a tick jobs run in
//! order.

use crate::algorithm::{SnapshotSource, VersionsSnapshot};
use crate::buildstarter::BuildStarter;
use crate::inputmapper::InputMapper;
use ferrite_core::build::Build;
use ferrite_core::config::{JobConfig, PipelineConfig, ResourceConfig, ResourceTypeConfig};
use ferrite_core::ids::PipelineId;
use ferrite_core::ports::{BuildStore, ConfigStore, JobStore, Scanner};
use ferrite_core::{Error, Result};
use ferrite_db::{Lease, LeaseService};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub struct Scheduler {
    config: Arc<dyn ConfigStore>,
    snapshots: Arc<dyn SnapshotSource>,
    builds: Arc<dyn BuildStore>,
    jobs: Arc<dyn JobStore>,
    scanner: Arc<dyn Scanner>,
    input_mapper: Arc<InputMapper>,
    build_starter: Arc<BuildStarter>,
    leases: LeaseService,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: Arc<dyn ConfigStore>,
        snapshots: Arc<dyn SnapshotSource>,
        builds: Arc<dyn BuildStore>,
        jobs: Arc<dyn JobStore>,
        scanner: Arc<dyn Scanner>,
        input_mapper: Arc<InputMapper>,
        build_starter: Arc<BuildStarter>,
        leases: LeaseService,
    ) -> Self {
        Self {
            config,
            snapshots,
            builds,
            jobs,
            scanner,
            input_mapper,
            build_starter,
            leases,
        }
    }

    /// Run one scheduling tick for the pipeline. Lease contention is a clean
    /// no-op; config and snapshot load failures propagate, per-job failures
    /// are contained.
    pub async fn schedule(&self, pipeline: PipelineId, interval: Duration) -> Result<()> {
        let lease = self.leases.scheduling(pipeline, interval);
        match lease.acquire().await {
            Ok(true) => {}
            Ok(false) => return Ok(()),
            Err(e) => {
                error!(%pipeline, error = %e, "Failed to acquire scheduling lease");
                return Ok(());
            }
        }

        let result = self.schedule_under_lease(pipeline).await;

        if let Err(e) = lease.release().await {
            warn!(%pipeline, error = %e, "Failed to release scheduling lease");
        }

        result
    }

    async fn schedule_under_lease(&self, pipeline: PipelineId) -> Result<()> {
        let Some(config) = self.config.get_pipeline_config(pipeline).await? else {
            debug!(%pipeline, "Pipeline configuration disappeared");
            return Ok(());
        };

        let tick_start = Instant::now();

        let snapshot = self.snapshots.load_versions_snapshot(pipeline).await?;
        debug!(
            pipeline = %config.name,
            elapsed_ms = tick_start.elapsed().as_millis() as u64,
            "Loaded versions snapshot"
        );

        for job in &config.jobs {
            let job_start = Instant::now();

            if let Err(e) = self.schedule_job(pipeline, &snapshot, &config, job).await {
                error!(job = %job.name, error = %e, "Failed to schedule job");
            }

            debug!(
                pipeline = %config.name,
                job = %job.name,
                elapsed_ms = job_start.elapsed().as_millis() as u64,
                "Scheduled job"
            );
        }

        info!(
            pipeline = %config.name,
            elapsed_ms = tick_start.elapsed().as_millis() as u64,
            "Finished scheduling tick"
        );

        Ok(())
    }

    async fn schedule_job(
        &self,
        pipeline: PipelineId,
        snapshot: &VersionsSnapshot,
        config: &PipelineConfig,
        job: &JobConfig,
    ) -> Result<()> {
        let job_id = snapshot.job_id(&job.name)?;

        let mapping = self
            .input_mapper
            .save_next_input_mapping(snapshot, job_id, job)
            .await?;

        if let Some(mapping) = &mapping {
            for input in &job.inputs {
                if !input.trigger {
                    continue;
                }
                if mapping
                    .get(&input.name)
                    .is_some_and(|version| version.first_occurrence)
                {
                    self.builds.ensure_pending_build_exists(job_id).await?;
                    break;
                }
            }
        }

        self.build_starter
            .try_start_all_pending_builds(
                pipeline,
                job_id,
                job,
                &config.resources,
                &config.resource_types,
            )
            .await
    }

    /// Create a build for the job right away and, in a detached task, scan
    /// its resources under the per-job lease, re-map inputs against a fresh
    /// snapshot, and drain pending builds. The returned waiter completes
    /// when the detached task does.
    pub async fn trigger_immediately(
        &self,
        pipeline: PipelineId,
        job: &JobConfig,
        resources: &[ResourceConfig],
        resource_types: &[ResourceTypeConfig],
    ) -> Result<(Build, Waiter)> {
        let saved_job = self
            .jobs
            .find_job(pipeline, &job.name)
            .await?
            .ok_or_else(|| Error::UnknownJob(job.name.clone()))?;
        let job_id = saved_job.id;

        let lease = self.leases.resource_checking_for_job(job_id);
        // Contention is fine: whoever holds the lease is already checking
        // this job's resources.
        let leased = lease.acquire().await?;

        let build = match self.builds.create_job_build(job_id).await {
            Ok(build) => build,
            Err(e) => {
                if leased {
                    if let Err(e) = lease.release().await {
                        warn!(job = %job.name, error = %e, "Failed to release resource checking lease");
                    }
                }
                return Err(e);
            }
        };

        let scanner = self.scanner.clone();
        let snapshots = self.snapshots.clone();
        let input_mapper = self.input_mapper.clone();
        let build_starter = self.build_starter.clone();
        let job = job.clone();
        let resources = resources.to_vec();
        let resource_types = resource_types.to_vec();

        let handle = tokio::spawn(async move {
            if leased {
                for input in &job.inputs {
                    if let Err(e) = scanner.scan(&input.resource).await {
                        // The build stays pending; a later tick may
                        // schedule it once the resource checks again.
                        error!(resource = %input.resource, error = %e, "Failed to scan resource");
                        release_quietly(&lease, &job.name).await;
                        return;
                    }
                }

                let snapshot = match snapshots.load_versions_snapshot(pipeline).await {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        error!(job = %job.name, error = %e, "Failed to load versions snapshot");
                        release_quietly(&lease, &job.name).await;
                        return;
                    }
                };

                if let Err(e) = input_mapper
                    .save_next_input_mapping(&snapshot, job_id, &job)
                    .await
                {
                    error!(job = %job.name, error = %e, "Failed to save next input mapping");
                    release_quietly(&lease, &job.name).await;
                    return;
                }

                // Release before starting builds so other processes are not
                // held off the job any longer than the scan requires.
                release_quietly(&lease, &job.name).await;
            }

            if let Err(e) = build_starter
                .try_start_all_pending_builds(pipeline, job_id, &job, &resources, &resource_types)
                .await
            {
                error!(job = %job.name, error = %e, "Failed to start pending builds");
            }
        });

        Ok((build, Waiter { handle }))
    }
}

async fn release_quietly(lease: &Lease, job: &str) {
    if let Err(e) = lease.release().await {
        warn!(job = %job, error = %e, "Failed to release resource checking lease");
    }
}

/// Handle to a trigger-immediately detached task.
pub struct Waiter {
    handle: JoinHandle<()>,
}

impl Waiter {
    /// Block until scheduling has completed.
    pub async fn wait(self) {
        if let Err(e) = self.handle.await {
            warn!(error = %e, "Trigger task failed");
        }
    }
}

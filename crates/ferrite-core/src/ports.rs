//! Port traits (hexagonal architecture).
//!
//! The scheduler reaches the shared store, the resource scanner, and the
//! execution engine exclusively through these narrow capability traits.
//! Each consumer depends only on the subset it uses; tests substitute
//! in-memory fakes per capability.

use crate::build::{Build, BuildInput, BuildStatus, InputMapping, Plan, ReportedVersion};
use crate::config::{JobConfig, PipelineConfig, ResourceConfig, ResourceTypeConfig};
use crate::ids::{BuildId, JobId, LockId, PipelineId};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Pipeline configuration as stored.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    /// Fetch the pipeline's configuration; `None` when the pipeline has been
    /// removed since the tick was planned.
    async fn get_pipeline_config(&self, pipeline: PipelineId) -> Result<Option<PipelineConfig>>;
}

/// A job row as stored, independent of its configuration.
#[derive(Debug, Clone)]
pub struct SavedJob {
    pub id: JobId,
    pub pipeline_id: PipelineId,
    pub name: String,
    pub paused: bool,
}

/// Job rows and their pause/diagnostic flags.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get_job(&self, job: JobId) -> Result<SavedJob>;

    async fn find_job(&self, pipeline: PipelineId, name: &str) -> Result<Option<SavedJob>>;

    async fn is_pipeline_paused(&self, pipeline: PipelineId) -> Result<bool>;

    /// Persist the max-in-flight diagnostic computed on every starter
    /// iteration.
    async fn set_max_in_flight_reached(&self, job: JobId, reached: bool) -> Result<()>;
}

/// Independent and next input mappings, persisted per job.
#[async_trait]
pub trait MappingStore: Send + Sync {
    async fn save_independent_input_mapping(
        &self,
        job: JobId,
        mapping: &InputMapping,
    ) -> Result<()>;

    async fn save_next_input_mapping(&self, job: JobId, mapping: &InputMapping) -> Result<()>;

    async fn delete_next_input_mapping(&self, job: JobId) -> Result<()>;

    /// Materialize the job's next mapping as concrete build inputs; `None`
    /// when no next mapping is present.
    async fn get_next_build_inputs(&self, job: JobId) -> Result<Option<Vec<BuildInput>>>;
}

/// Build rows: creation, admission queries, and status transitions.
#[async_trait]
pub trait BuildStore: Send + Sync {
    async fn create_job_build(&self, job: JobId) -> Result<Build>;

    /// Create a pending build unless one already exists for the job.
    async fn ensure_pending_build_exists(&self, job: JobId) -> Result<()>;

    /// Oldest pending build of the job, if any.
    async fn get_next_pending_build(&self, job: JobId) -> Result<Option<Build>>;

    /// Active (scheduled or started) builds of all jobs sharing any of the
    /// given serial groups within the job's pipeline.
    async fn get_running_builds_by_serial_group(
        &self,
        job: JobId,
        serial_groups: &[String],
    ) -> Result<Vec<Build>>;

    /// Oldest pending build across all jobs sharing any of the given serial
    /// groups within the job's pipeline.
    async fn get_next_pending_build_by_serial_group(
        &self,
        job: JobId,
        serial_groups: &[String],
    ) -> Result<Option<Build>>;

    /// Compare-and-set `pending → scheduled`. Returns false when another
    /// process won the transition.
    async fn update_build_to_scheduled(&self, build: BuildId) -> Result<bool>;

    /// Freeze the build's input versions. Called once, at the transition to
    /// scheduled.
    async fn use_inputs_for_build(&self, build: BuildId, inputs: &[BuildInput]) -> Result<()>;

    /// Finish a build that never started (no build events are emitted).
    async fn finish_build(
        &self,
        build: BuildId,
        pipeline: PipelineId,
        status: BuildStatus,
    ) -> Result<()>;

    /// Record a status reported by the execution engine.
    async fn save_build_status(&self, build: BuildId, status: BuildStatus) -> Result<()>;

    async fn save_build_input(&self, build: BuildId, version: &ReportedVersion) -> Result<()>;

    async fn save_build_output(&self, build: BuildId, version: &ReportedVersion) -> Result<()>;
}

/// Advisory locks in the shared store.
///
/// Locks are session-scoped: a crashed holder's lock is reclaimed by the
/// store when its connection dies. The deadline is advisory metadata for
/// stores that enforce expiry themselves.
#[async_trait]
pub trait LockStore: Send + Sync {
    async fn try_acquire(&self, lock: LockId, deadline: DateTime<Utc>) -> Result<bool>;

    async fn release(&self, lock: LockId) -> Result<()>;
}

/// Forces a fresh version check of a resource.
#[async_trait]
pub trait Scanner: Send + Sync {
    async fn scan(&self, resource: &str) -> Result<()>;
}

/// Builds an execution plan from a job's configuration and resolved inputs.
pub trait PlanFactory: Send + Sync {
    fn create(
        &self,
        job: &JobConfig,
        resources: &[ResourceConfig],
        resource_types: &[ResourceTypeConfig],
        inputs: &[BuildInput],
    ) -> Result<Plan>;
}

/// The execution engine.
#[async_trait]
pub trait Engine: Send + Sync {
    async fn create_build(&self, build: &Build, plan: Plan) -> Result<Arc<dyn EngineBuild>>;
}

/// A build accepted by the engine; `resume` starts execution.
#[async_trait]
pub trait EngineBuild: Send + Sync {
    async fn resume(&self);
}

/// Injectable wall clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

//! In-memory implementations of the capability ports.
//!
//! One store carries the whole shared-store state behind a single mutex so a
//! test can wire the same instance into every port a component needs, then
//! inspect the state it left behind.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use ferrite_core::build::{Build, BuildInput, BuildStatus, InputMapping, Plan, ReportedVersion};
use ferrite_core::config::{
    JobConfig, PipelineConfig, ResourceConfig, ResourceTypeConfig,
};
use ferrite_core::ids::{BuildId, JobId, LockId, PipelineId, ResourceId, VersionId};
use ferrite_core::ports::{
    BuildStore, Clock, ConfigStore, Engine, EngineBuild, JobStore, LockStore, MappingStore,
    PlanFactory, SavedJob, Scanner,
};
use ferrite_core::{Error, Result};
use ferrite_scheduler::algorithm::{
    BuildInputRow, BuildOutputRow, ResourceVersionRow, SnapshotSource, VersionsSnapshot,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug, Clone)]
struct VersionRecord {
    version_id: VersionId,
    resource_id: ResourceId,
    check_order: i64,
    disabled: bool,
}

#[derive(Debug, Clone)]
struct BuildInputRecord {
    build_id: BuildId,
    job_id: JobId,
    input_name: String,
    version_id: VersionId,
}

#[derive(Debug, Clone)]
struct BuildOutputRecord {
    build_id: BuildId,
    job_id: JobId,
    version_id: VersionId,
}

#[derive(Default)]
struct StoreState {
    pipelines: HashMap<PipelineId, PipelineConfig>,
    paused_pipelines: HashSet<PipelineId>,
    jobs: HashMap<JobId, SavedJob>,
    max_in_flight_reached: HashMap<JobId, bool>,
    job_ids: HashMap<String, JobId>,
    resource_ids: HashMap<String, ResourceId>,
    versions: Vec<VersionRecord>,
    builds: Vec<Build>,
    build_inputs: Vec<BuildInputRecord>,
    build_outputs: Vec<BuildOutputRecord>,
    independent: HashMap<JobId, InputMapping>,
    next: HashMap<JobId, InputMapping>,
    next_pipeline_id: i32,
    next_job_id: i32,
    next_resource_id: i32,
    next_version_id: i32,
    next_build_id: i32,
}

impl StoreState {
    fn version(&self, version: VersionId) -> Option<&VersionRecord> {
        self.versions.iter().find(|v| v.version_id == version)
    }

    fn new_build(&mut self, job: JobId) -> Result<Build> {
        let saved = self
            .jobs
            .get(&job)
            .ok_or_else(|| Error::UnknownJob(job.to_string()))?;

        self.next_build_id += 1;
        let build = Build {
            id: BuildId(self.next_build_id),
            job_id: job,
            pipeline_id: saved.pipeline_id,
            status: BuildStatus::Pending,
        };
        self.builds.push(build.clone());
        Ok(build)
    }

    /// Job ids in the pipeline whose serial groups intersect `groups`.
    fn jobs_in_serial_groups(&self, pipeline: PipelineId, groups: &[String]) -> Vec<JobId> {
        let Some(config) = self.pipelines.get(&pipeline) else {
            return vec![];
        };

        config
            .jobs
            .iter()
            .filter(|job| {
                job.effective_serial_groups()
                    .iter()
                    .any(|g| groups.contains(g))
            })
            .filter_map(|job| self.job_ids.get(&job.name).copied())
            .collect()
    }
}

/// The whole shared store, in memory.
#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a pipeline, assigning ids to its jobs and resources.
    pub fn add_pipeline(&self, config: PipelineConfig) -> PipelineId {
        let mut state = lock(&self.state);
        state.next_pipeline_id += 1;
        let pipeline = PipelineId(state.next_pipeline_id);

        for job in &config.jobs {
            state.next_job_id += 1;
            let id = JobId(state.next_job_id);
            state.job_ids.insert(job.name.clone(), id);
            state.jobs.insert(
                id,
                SavedJob {
                    id,
                    pipeline_id: pipeline,
                    name: job.name.clone(),
                    paused: false,
                },
            );
        }

        for resource in &config.resources {
            state.next_resource_id += 1;
            let id = ResourceId(state.next_resource_id);
            state.resource_ids.insert(resource.name.clone(), id);
        }

        state.pipelines.insert(pipeline, config);
        pipeline
    }

    pub fn job_id(&self, name: &str) -> JobId {
        lock(&self.state).job_ids[name]
    }

    pub fn resource_id(&self, name: &str) -> ResourceId {
        lock(&self.state).resource_ids[name]
    }

    /// Record a discovered version of a resource.
    pub fn add_version(&self, resource: &str, check_order: i64) -> VersionId {
        let mut state = lock(&self.state);
        let resource_id = state.resource_ids[resource];
        state.next_version_id += 1;
        let version_id = VersionId(state.next_version_id);
        state.versions.push(VersionRecord {
            version_id,
            resource_id,
            check_order,
            disabled: false,
        });
        version_id
    }

    /// Disabled versions are filtered out of snapshots.
    pub fn disable_version(&self, version: VersionId) {
        let mut state = lock(&self.state);
        if let Some(record) = state.versions.iter_mut().find(|v| v.version_id == version) {
            record.disabled = true;
        }
    }

    /// Seed a finished build with recorded inputs and outputs, for
    /// provenance history.
    pub fn add_finished_build(
        &self,
        job: &str,
        inputs: &[(&str, VersionId)],
        outputs: &[VersionId],
    ) -> BuildId {
        let mut state = lock(&self.state);
        let job_id = state.job_ids[job];
        let build_id = state.new_build(job_id).expect("job registered").id;
        if let Some(slot) = state.builds.iter_mut().find(|b| b.id == build_id) {
            slot.status = BuildStatus::Succeeded;
        }

        for (name, version) in inputs {
            state.build_inputs.push(BuildInputRecord {
                build_id,
                job_id,
                input_name: name.to_string(),
                version_id: *version,
            });
        }
        for version in outputs {
            state.build_outputs.push(BuildOutputRecord {
                build_id,
                job_id,
                version_id: *version,
            });
        }

        build_id
    }

    pub fn pause_pipeline(&self, pipeline: PipelineId) {
        lock(&self.state).paused_pipelines.insert(pipeline);
    }

    pub fn pause_job(&self, name: &str) {
        let mut state = lock(&self.state);
        let id = state.job_ids[name];
        if let Some(job) = state.jobs.get_mut(&id) {
            job.paused = true;
        }
    }

    // Inspection helpers.

    pub fn build(&self, build: BuildId) -> Option<Build> {
        lock(&self.state).builds.iter().find(|b| b.id == build).cloned()
    }

    pub fn builds_of_job(&self, job: JobId) -> Vec<Build> {
        lock(&self.state)
            .builds
            .iter()
            .filter(|b| b.job_id == job)
            .cloned()
            .collect()
    }

    pub fn independent_mapping(&self, job: JobId) -> Option<InputMapping> {
        lock(&self.state).independent.get(&job).cloned()
    }

    pub fn next_mapping(&self, job: JobId) -> Option<InputMapping> {
        lock(&self.state).next.get(&job).cloned()
    }

    pub fn max_in_flight_reached(&self, job: JobId) -> Option<bool> {
        lock(&self.state).max_in_flight_reached.get(&job).copied()
    }

    pub fn inputs_of_build(&self, build: BuildId) -> Vec<(String, VersionId)> {
        lock(&self.state)
            .build_inputs
            .iter()
            .filter(|record| record.build_id == build)
            .map(|record| (record.input_name.clone(), record.version_id))
            .collect()
    }

    pub fn outputs_of_build(&self, build: BuildId) -> Vec<VersionId> {
        lock(&self.state)
            .build_outputs
            .iter()
            .filter(|record| record.build_id == build)
            .map(|record| record.version_id)
            .collect()
    }

    /// Force a build's status, bypassing the transition rules. For arranging
    /// race and recovery scenarios.
    pub fn set_build_status(&self, build: BuildId, status: BuildStatus) {
        let mut state = lock(&self.state);
        if let Some(slot) = state.builds.iter_mut().find(|b| b.id == build) {
            slot.status = status;
        }
    }
}

#[async_trait]
impl ConfigStore for InMemoryStore {
    async fn get_pipeline_config(&self, pipeline: PipelineId) -> Result<Option<PipelineConfig>> {
        Ok(lock(&self.state).pipelines.get(&pipeline).cloned())
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn get_job(&self, job: JobId) -> Result<SavedJob> {
        lock(&self.state)
            .jobs
            .get(&job)
            .cloned()
            .ok_or_else(|| Error::UnknownJob(job.to_string()))
    }

    async fn find_job(&self, pipeline: PipelineId, name: &str) -> Result<Option<SavedJob>> {
        Ok(lock(&self.state)
            .jobs
            .values()
            .find(|j| j.pipeline_id == pipeline && j.name == name)
            .cloned())
    }

    async fn is_pipeline_paused(&self, pipeline: PipelineId) -> Result<bool> {
        Ok(lock(&self.state).paused_pipelines.contains(&pipeline))
    }

    async fn set_max_in_flight_reached(&self, job: JobId, reached: bool) -> Result<()> {
        lock(&self.state).max_in_flight_reached.insert(job, reached);
        Ok(())
    }
}

#[async_trait]
impl MappingStore for InMemoryStore {
    async fn save_independent_input_mapping(
        &self,
        job: JobId,
        mapping: &InputMapping,
    ) -> Result<()> {
        lock(&self.state).independent.insert(job, mapping.clone());
        Ok(())
    }

    async fn save_next_input_mapping(&self, job: JobId, mapping: &InputMapping) -> Result<()> {
        lock(&self.state).next.insert(job, mapping.clone());
        Ok(())
    }

    async fn delete_next_input_mapping(&self, job: JobId) -> Result<()> {
        lock(&self.state).next.remove(&job);
        Ok(())
    }

    async fn get_next_build_inputs(&self, job: JobId) -> Result<Option<Vec<BuildInput>>> {
        let state = lock(&self.state);
        let Some(mapping) = state.next.get(&job) else {
            return Ok(None);
        };

        let mut inputs = Vec::with_capacity(mapping.len());
        for (name, version) in mapping {
            let record = state
                .version(version.version_id)
                .ok_or_else(|| Error::Internal(format!("dangling version {}", version.version_id)))?;
            inputs.push(BuildInput {
                name: name.clone(),
                resource_id: record.resource_id,
                version_id: version.version_id,
                first_occurrence: version.first_occurrence,
            });
        }
        Ok(Some(inputs))
    }
}

#[async_trait]
impl BuildStore for InMemoryStore {
    async fn create_job_build(&self, job: JobId) -> Result<Build> {
        lock(&self.state).new_build(job)
    }

    async fn ensure_pending_build_exists(&self, job: JobId) -> Result<()> {
        let mut state = lock(&self.state);
        let pending_exists = state
            .builds
            .iter()
            .any(|b| b.job_id == job && b.status == BuildStatus::Pending);
        if !pending_exists {
            state.new_build(job)?;
        }
        Ok(())
    }

    async fn get_next_pending_build(&self, job: JobId) -> Result<Option<Build>> {
        Ok(lock(&self.state)
            .builds
            .iter()
            .filter(|b| b.job_id == job && b.status == BuildStatus::Pending)
            .min_by_key(|b| b.id)
            .cloned())
    }

    async fn get_running_builds_by_serial_group(
        &self,
        job: JobId,
        serial_groups: &[String],
    ) -> Result<Vec<Build>> {
        let state = lock(&self.state);
        let saved = state
            .jobs
            .get(&job)
            .ok_or_else(|| Error::UnknownJob(job.to_string()))?;
        let members = state.jobs_in_serial_groups(saved.pipeline_id, serial_groups);

        Ok(state
            .builds
            .iter()
            .filter(|b| members.contains(&b.job_id) && b.status.is_active())
            .cloned()
            .collect())
    }

    async fn get_next_pending_build_by_serial_group(
        &self,
        job: JobId,
        serial_groups: &[String],
    ) -> Result<Option<Build>> {
        let state = lock(&self.state);
        let saved = state
            .jobs
            .get(&job)
            .ok_or_else(|| Error::UnknownJob(job.to_string()))?;
        let members = state.jobs_in_serial_groups(saved.pipeline_id, serial_groups);

        Ok(state
            .builds
            .iter()
            .filter(|b| members.contains(&b.job_id) && b.status == BuildStatus::Pending)
            .min_by_key(|b| b.id)
            .cloned())
    }

    async fn update_build_to_scheduled(&self, build: BuildId) -> Result<bool> {
        let mut state = lock(&self.state);
        let Some(slot) = state.builds.iter_mut().find(|b| b.id == build) else {
            return Err(Error::BuildNotFound(build.as_i32()));
        };
        if slot.status != BuildStatus::Pending {
            return Ok(false);
        }
        slot.status = BuildStatus::Scheduled;
        Ok(true)
    }

    async fn use_inputs_for_build(&self, build: BuildId, inputs: &[BuildInput]) -> Result<()> {
        let mut state = lock(&self.state);
        let job_id = state
            .builds
            .iter()
            .find(|b| b.id == build)
            .map(|b| b.job_id)
            .ok_or_else(|| Error::BuildNotFound(build.as_i32()))?;

        for input in inputs {
            state.build_inputs.push(BuildInputRecord {
                build_id: build,
                job_id,
                input_name: input.name.clone(),
                version_id: input.version_id,
            });
        }
        Ok(())
    }

    async fn finish_build(
        &self,
        build: BuildId,
        _pipeline: PipelineId,
        status: BuildStatus,
    ) -> Result<()> {
        let mut state = lock(&self.state);
        let slot = state
            .builds
            .iter_mut()
            .find(|b| b.id == build)
            .ok_or_else(|| Error::BuildNotFound(build.as_i32()))?;
        slot.status = status;
        Ok(())
    }

    async fn save_build_status(&self, build: BuildId, status: BuildStatus) -> Result<()> {
        let mut state = lock(&self.state);
        let slot = state
            .builds
            .iter_mut()
            .find(|b| b.id == build)
            .ok_or_else(|| Error::BuildNotFound(build.as_i32()))?;
        slot.status = status;
        Ok(())
    }

    async fn save_build_input(&self, build: BuildId, version: &ReportedVersion) -> Result<()> {
        let mut state = lock(&self.state);
        let job_id = state
            .builds
            .iter()
            .find(|b| b.id == build)
            .map(|b| b.job_id)
            .ok_or_else(|| Error::BuildNotFound(build.as_i32()))?;
        state.build_inputs.push(BuildInputRecord {
            build_id: build,
            job_id,
            input_name: version.name.clone(),
            version_id: version.version_id,
        });
        Ok(())
    }

    async fn save_build_output(&self, build: BuildId, version: &ReportedVersion) -> Result<()> {
        let mut state = lock(&self.state);
        let job_id = state
            .builds
            .iter()
            .find(|b| b.id == build)
            .map(|b| b.job_id)
            .ok_or_else(|| Error::BuildNotFound(build.as_i32()))?;
        state.build_outputs.push(BuildOutputRecord {
            build_id: build,
            job_id,
            version_id: version.version_id,
        });
        Ok(())
    }
}

#[async_trait]
impl SnapshotSource for InMemoryStore {
    async fn load_versions_snapshot(&self, _pipeline: PipelineId) -> Result<Arc<VersionsSnapshot>> {
        let state = lock(&self.state);

        let resource_versions: Vec<ResourceVersionRow> = state
            .versions
            .iter()
            .filter(|v| !v.disabled)
            .map(|v| ResourceVersionRow {
                version_id: v.version_id,
                resource_id: v.resource_id,
                check_order: v.check_order,
            })
            .collect();

        let build_outputs = state
            .build_outputs
            .iter()
            .filter_map(|record| {
                let version = state.version(record.version_id)?;
                if version.disabled {
                    return None;
                }
                Some(BuildOutputRow {
                    version_id: record.version_id,
                    resource_id: version.resource_id,
                    check_order: version.check_order,
                    build_id: record.build_id,
                    job_id: record.job_id,
                })
            })
            .collect();

        let build_inputs = state
            .build_inputs
            .iter()
            .filter_map(|record| {
                let version = state.version(record.version_id)?;
                Some(BuildInputRow {
                    version_id: record.version_id,
                    resource_id: version.resource_id,
                    check_order: version.check_order,
                    build_id: record.build_id,
                    job_id: record.job_id,
                    input_name: record.input_name.clone(),
                })
            })
            .collect();

        Ok(Arc::new(VersionsSnapshot {
            resource_versions,
            build_outputs,
            build_inputs,
            job_ids: state.job_ids.clone(),
            resource_ids: state.resource_ids.clone(),
        }))
    }
}

/// Advisory locks with clock-driven deadline reclaim.
pub struct InMemoryLockStore {
    held: Mutex<HashMap<LockId, DateTime<Utc>>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryLockStore {
    pub fn new(clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Self {
            held: Mutex::new(HashMap::new()),
            clock,
        })
    }

    pub fn held(&self, lock_id: LockId) -> bool {
        lock(&self.held).contains_key(&lock_id)
    }
}

#[async_trait]
impl LockStore for InMemoryLockStore {
    async fn try_acquire(&self, lock_id: LockId, deadline: DateTime<Utc>) -> Result<bool> {
        let now = self.clock.now();
        let mut held = lock(&self.held);
        held.retain(|_, expires| *expires > now);

        if held.contains_key(&lock_id) {
            return Ok(false);
        }
        held.insert(lock_id, deadline);
        Ok(true)
    }

    async fn release(&self, lock_id: LockId) -> Result<()> {
        lock(&self.held).remove(&lock_id);
        Ok(())
    }
}

/// A controllable clock.
pub struct TestClock {
    now: Mutex<DateTime<Utc>>,
}

impl TestClock {
    pub fn new() -> Arc<Self> {
        let start = Utc.with_ymd_and_hms(2016, 1, 1, 0, 0, 0).unwrap();
        Arc::new(Self {
            now: Mutex::new(start),
        })
    }

    pub fn advance(&self, by: Duration) {
        let mut now = lock(&self.now);
        *now += ChronoDuration::from_std(by).unwrap_or_else(|_| ChronoDuration::zero());
    }
}

impl Clock for TestClock {
    fn now(&self) -> DateTime<Utc> {
        *lock(&self.now)
    }
}

/// Records scans; optionally fails for one resource.
#[derive(Default)]
pub struct FakeScanner {
    scanned: Mutex<Vec<String>>,
    fail_on: Mutex<Option<String>>,
}

impl FakeScanner {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_on(&self, resource: &str) {
        *lock(&self.fail_on) = Some(resource.to_string());
    }

    pub fn scanned(&self) -> Vec<String> {
        lock(&self.scanned).clone()
    }
}

#[async_trait]
impl Scanner for FakeScanner {
    async fn scan(&self, resource: &str) -> Result<()> {
        if lock(&self.fail_on).as_deref() == Some(resource) {
            return Err(Error::Scan {
                resource: resource.to_string(),
                message: "scan failed".to_string(),
            });
        }
        lock(&self.scanned).push(resource.to_string());
        Ok(())
    }
}

/// Records created builds; resumes bump a counter.
#[derive(Default)]
pub struct FakeEngine {
    created: Mutex<Vec<BuildId>>,
    resumed: Arc<AtomicUsize>,
    fail: AtomicBool,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_creates(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn created(&self) -> Vec<BuildId> {
        lock(&self.created).clone()
    }

    pub fn resumed_count(&self) -> usize {
        self.resumed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Engine for FakeEngine {
    async fn create_build(&self, build: &Build, _plan: Plan) -> Result<Arc<dyn EngineBuild>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::Engine("engine unavailable".to_string()));
        }
        lock(&self.created).push(build.id);
        Ok(Arc::new(FakeEngineBuild {
            resumed: self.resumed.clone(),
        }))
    }
}

pub struct FakeEngineBuild {
    resumed: Arc<AtomicUsize>,
}

#[async_trait]
impl EngineBuild for FakeEngineBuild {
    async fn resume(&self) {
        self.resumed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Produces a trivial plan carrying the job name and input names.
#[derive(Default)]
pub struct FakePlanFactory {
    fail: AtomicBool,
}

impl FakePlanFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fail_creates(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }
}

impl PlanFactory for FakePlanFactory {
    fn create(
        &self,
        job: &JobConfig,
        _resources: &[ResourceConfig],
        _resource_types: &[ResourceTypeConfig],
        inputs: &[BuildInput],
    ) -> Result<Plan> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(Error::PlanCreation("plan factory failed".to_string()));
        }
        let input_names: Vec<&str> = inputs.iter().map(|i| i.name.as_str()).collect();
        Ok(Plan(serde_json::json!({
            "job": job.name,
            "inputs": input_names,
        })))
    }
}

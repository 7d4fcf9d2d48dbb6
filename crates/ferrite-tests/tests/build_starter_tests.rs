//! Build starter admission control: gate order, serial-group FIFO, the CAS
//! to scheduled, and non-fatal plan/engine failures.

use async_trait::async_trait;
use ferrite_core::build::{Build, BuildInput, BuildStatus, ReportedVersion};
use ferrite_core::ids::{BuildId, JobId, PipelineId};
use ferrite_core::ports::{BuildStore, ConfigStore};
use ferrite_core::Result;
use ferrite_db::LeaseService;
use ferrite_scheduler::algorithm::SnapshotSource;
use ferrite_scheduler::BuildStarter;
use ferrite_tests::fakes::InMemoryStore;
use ferrite_tests::fixtures::{input, job, pipeline, serial_job};
use ferrite_tests::helpers::{wait_for, TestHarness};
use std::sync::Arc;
use std::time::Duration;

/// Map inputs for a job so the starter has a next mapping to feed builds.
async fn map_inputs(harness: &TestHarness, pipeline_id: PipelineId, job_name: &str) -> JobId {
    let snapshot = harness
        .store
        .load_versions_snapshot(pipeline_id)
        .await
        .unwrap();
    let job_id = harness.store.job_id(job_name);
    let config = harness
        .store
        .get_pipeline_config(pipeline_id)
        .await
        .unwrap()
        .unwrap();
    harness
        .input_mapper
        .save_next_input_mapping(&snapshot, job_id, config.job(job_name).unwrap())
        .await
        .unwrap();
    job_id
}

async fn drain(harness: &TestHarness, pipeline_id: PipelineId, job_name: &str, job_id: JobId) {
    let config = harness
        .store
        .get_pipeline_config(pipeline_id)
        .await
        .unwrap()
        .unwrap();
    harness
        .build_starter
        .try_start_all_pending_builds(
            pipeline_id,
            job_id,
            config.job(job_name).unwrap(),
            &config.resources,
            &config.resource_types,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_starts_pending_build_with_frozen_inputs() {
    let harness = TestHarness::new();
    let pid = harness.store.add_pipeline(pipeline(
        "main",
        vec![job("deploy", vec![input("in", "repo")])],
        vec!["repo"],
    ));
    let version = harness.store.add_version("repo", 1);

    let job_id = map_inputs(&harness, pid, "deploy").await;
    harness.store.ensure_pending_build_exists(job_id).await.unwrap();

    drain(&harness, pid, "deploy", job_id).await;

    let builds = harness.store.builds_of_job(job_id);
    assert_eq!(builds.len(), 1);
    assert_eq!(builds[0].status, BuildStatus::Scheduled);
    assert_eq!(harness.engine.created(), vec![builds[0].id]);
    assert_eq!(
        harness.store.inputs_of_build(builds[0].id),
        vec![("in".to_string(), version)]
    );
    assert_eq!(harness.store.max_in_flight_reached(job_id), Some(false));

    assert!(wait_for(Duration::from_secs(1), || harness.engine.resumed_count() == 1).await);
}

#[tokio::test]
async fn test_unbounded_job_drains_all_pending_builds_in_order() {
    let harness = TestHarness::new();
    let pid = harness.store.add_pipeline(pipeline(
        "main",
        vec![job("test", vec![input("in", "repo")])],
        vec!["repo"],
    ));
    harness.store.add_version("repo", 1);

    let job_id = map_inputs(&harness, pid, "test").await;
    let first = harness.store.create_job_build(job_id).await.unwrap();
    let second = harness.store.create_job_build(job_id).await.unwrap();

    drain(&harness, pid, "test", job_id).await;

    assert_eq!(harness.engine.created(), vec![first.id, second.id]);
}

#[tokio::test]
async fn test_serial_group_fifo_with_max_in_flight_one() {
    let harness = TestHarness::new();
    let pid = harness.store.add_pipeline(pipeline(
        "main",
        vec![serial_job("deploy", vec![input("in", "repo")])],
        vec!["repo"],
    ));
    harness.store.add_version("repo", 1);

    let job_id = map_inputs(&harness, pid, "deploy").await;
    let first = harness.store.create_job_build(job_id).await.unwrap();
    let second = harness.store.create_job_build(job_id).await.unwrap();

    drain(&harness, pid, "deploy", job_id).await;

    // Only the oldest pending build started; the group is now full.
    assert_eq!(harness.engine.created(), vec![first.id]);
    assert_eq!(
        harness.store.build(second.id).unwrap().status,
        BuildStatus::Pending
    );
    assert_eq!(harness.store.max_in_flight_reached(job_id), Some(true));

    // Draining again while the first is still in flight starts nothing.
    drain(&harness, pid, "deploy", job_id).await;
    assert_eq!(harness.engine.created(), vec![first.id]);

    // Once the first finishes, the next tick schedules the second, never
    // reversing order.
    harness.store.set_build_status(first.id, BuildStatus::Succeeded);
    drain(&harness, pid, "deploy", job_id).await;
    assert_eq!(harness.engine.created(), vec![first.id, second.id]);
}

#[tokio::test]
async fn test_stops_without_next_mapping() {
    let harness = TestHarness::new();
    let pid = harness.store.add_pipeline(pipeline(
        "main",
        vec![job("deploy", vec![input("in", "repo")])],
        vec!["repo"],
    ));
    // No versions, so mapping never saves.
    let job_id = harness.store.job_id("deploy");
    harness.store.ensure_pending_build_exists(job_id).await.unwrap();

    drain(&harness, pid, "deploy", job_id).await;

    assert!(harness.engine.created().is_empty());
    let builds = harness.store.builds_of_job(job_id);
    assert_eq!(builds[0].status, BuildStatus::Pending);
}

#[tokio::test]
async fn test_paused_pipeline_blocks_start() {
    let harness = TestHarness::new();
    let pid = harness.store.add_pipeline(pipeline(
        "main",
        vec![job("deploy", vec![input("in", "repo")])],
        vec!["repo"],
    ));
    harness.store.add_version("repo", 1);
    harness.store.pause_pipeline(pid);

    let job_id = map_inputs(&harness, pid, "deploy").await;
    harness.store.ensure_pending_build_exists(job_id).await.unwrap();

    drain(&harness, pid, "deploy", job_id).await;

    assert!(harness.engine.created().is_empty());
}

#[tokio::test]
async fn test_paused_job_blocks_start() {
    let harness = TestHarness::new();
    let pid = harness.store.add_pipeline(pipeline(
        "main",
        vec![job("deploy", vec![input("in", "repo")])],
        vec!["repo"],
    ));
    harness.store.add_version("repo", 1);
    harness.store.pause_job("deploy");

    let job_id = map_inputs(&harness, pid, "deploy").await;
    harness.store.ensure_pending_build_exists(job_id).await.unwrap();

    drain(&harness, pid, "deploy", job_id).await;

    assert!(harness.engine.created().is_empty());
}

#[tokio::test]
async fn test_plan_failure_marks_build_errored() {
    let harness = TestHarness::new();
    let pid = harness.store.add_pipeline(pipeline(
        "main",
        vec![job("deploy", vec![input("in", "repo")])],
        vec!["repo"],
    ));
    harness.store.add_version("repo", 1);
    harness.factory.fail_creates();

    let job_id = map_inputs(&harness, pid, "deploy").await;
    harness.store.ensure_pending_build_exists(job_id).await.unwrap();

    drain(&harness, pid, "deploy", job_id).await;

    let builds = harness.store.builds_of_job(job_id);
    assert_eq!(builds[0].status, BuildStatus::Errored);
    assert!(harness.engine.created().is_empty());
}

#[tokio::test]
async fn test_engine_failure_leaves_build_scheduled() {
    let harness = TestHarness::new();
    let pid = harness.store.add_pipeline(pipeline(
        "main",
        vec![job("deploy", vec![input("in", "repo")])],
        vec!["repo"],
    ));
    harness.store.add_version("repo", 1);
    harness.engine.fail_creates();

    let job_id = map_inputs(&harness, pid, "deploy").await;
    harness.store.ensure_pending_build_exists(job_id).await.unwrap();

    drain(&harness, pid, "deploy", job_id).await;

    // The status already advanced, so no other scheduler re-creates it.
    let builds = harness.store.builds_of_job(job_id);
    assert_eq!(builds[0].status, BuildStatus::Scheduled);
    assert_eq!(harness.engine.resumed_count(), 0);
}

#[tokio::test]
async fn test_concurrent_starters_schedule_each_build_once() {
    let one = TestHarness::new();
    let pid = one.store.add_pipeline(pipeline(
        "main",
        vec![job("deploy", vec![input("in", "repo")])],
        vec!["repo"],
    ));
    one.store.add_version("repo", 1);

    let job_id = map_inputs(&one, pid, "deploy").await;
    one.store.create_job_build(job_id).await.unwrap();
    one.store.create_job_build(job_id).await.unwrap();

    // A second scheduler process against the same store and lock table.
    let other = TestHarness::with_parts(one.store.clone(), one.locks.clone());

    tokio::join!(
        drain(&one, pid, "deploy", job_id),
        drain(&other, pid, "deploy", job_id),
    );

    // Every pending build went through exactly one engine.
    let mut created = one.engine.created();
    created.extend(other.engine.created());
    created.sort();
    created.dedup();
    assert_eq!(created.len(), 2);
    assert_eq!(one.engine.created().len() + other.engine.created().len(), 2);
}

/// Delegating store whose CAS always loses, as when another process won the
/// `pending → scheduled` transition between the pending lookup and the CAS.
struct LosingCasStore {
    inner: Arc<InMemoryStore>,
}

#[async_trait]
impl BuildStore for LosingCasStore {
    async fn create_job_build(&self, job: JobId) -> Result<Build> {
        self.inner.create_job_build(job).await
    }

    async fn ensure_pending_build_exists(&self, job: JobId) -> Result<()> {
        self.inner.ensure_pending_build_exists(job).await
    }

    async fn get_next_pending_build(&self, job: JobId) -> Result<Option<Build>> {
        self.inner.get_next_pending_build(job).await
    }

    async fn get_running_builds_by_serial_group(
        &self,
        job: JobId,
        serial_groups: &[String],
    ) -> Result<Vec<Build>> {
        self.inner
            .get_running_builds_by_serial_group(job, serial_groups)
            .await
    }

    async fn get_next_pending_build_by_serial_group(
        &self,
        job: JobId,
        serial_groups: &[String],
    ) -> Result<Option<Build>> {
        self.inner
            .get_next_pending_build_by_serial_group(job, serial_groups)
            .await
    }

    async fn update_build_to_scheduled(&self, build: BuildId) -> Result<bool> {
        // The other process got there first.
        self.inner.set_build_status(build, BuildStatus::Scheduled);
        Ok(false)
    }

    async fn use_inputs_for_build(&self, build: BuildId, inputs: &[BuildInput]) -> Result<()> {
        self.inner.use_inputs_for_build(build, inputs).await
    }

    async fn finish_build(
        &self,
        build: BuildId,
        pipeline: PipelineId,
        status: BuildStatus,
    ) -> Result<()> {
        self.inner.finish_build(build, pipeline, status).await
    }

    async fn save_build_status(&self, build: BuildId, status: BuildStatus) -> Result<()> {
        self.inner.save_build_status(build, status).await
    }

    async fn save_build_input(&self, build: BuildId, version: &ReportedVersion) -> Result<()> {
        self.inner.save_build_input(build, version).await
    }

    async fn save_build_output(&self, build: BuildId, version: &ReportedVersion) -> Result<()> {
        self.inner.save_build_output(build, version).await
    }
}

#[tokio::test]
async fn test_lost_cas_ends_iteration_without_engine_create() {
    let harness = TestHarness::new();
    let pid = harness.store.add_pipeline(pipeline(
        "main",
        vec![job("deploy", vec![input("in", "repo")])],
        vec!["repo"],
    ));
    harness.store.add_version("repo", 1);

    let job_id = map_inputs(&harness, pid, "deploy").await;
    let build = harness.store.create_job_build(job_id).await.unwrap();

    let losing = Arc::new(LosingCasStore {
        inner: harness.store.clone(),
    });
    let starter = BuildStarter::new(
        losing,
        harness.store.clone(),
        harness.store.clone(),
        harness.factory.clone(),
        harness.engine.clone(),
        LeaseService::new(
            harness.locks.clone(),
            Arc::new(ferrite_core::ports::SystemClock),
        ),
    );

    let config = harness.store.get_pipeline_config(pid).await.unwrap().unwrap();
    starter
        .try_start_all_pending_builds(
            pid,
            job_id,
            config.job("deploy").unwrap(),
            &config.resources,
            &config.resource_types,
        )
        .await
        .unwrap();

    // The losing side never touched the engine or froze inputs.
    assert!(harness.engine.created().is_empty());
    assert!(harness.store.inputs_of_build(build.id).is_empty());
}

//! End-to-end scheduling ticks and the trigger-immediately path.

use ferrite_core::build::BuildStatus;
use ferrite_core::ports::ConfigStore;
use ferrite_tests::fixtures::{input, job, pipeline, trigger_input};
use ferrite_tests::helpers::{wait_for, TestHarness};
use std::time::Duration;

const INTERVAL: Duration = Duration::from_secs(10);

#[tokio::test]
async fn test_new_triggering_version_creates_and_starts_one_build() {
    let harness = TestHarness::new();
    let pid = harness.store.add_pipeline(pipeline(
        "main",
        vec![job("deploy", vec![trigger_input("in", "repo")])],
        vec!["repo"],
    ));

    harness.store.add_version("repo", 1);
    harness.store.add_version("repo", 2);
    let v3 = harness.store.add_version("repo", 3);

    harness.scheduler.schedule(pid, INTERVAL).await.unwrap();

    let job_id = harness.store.job_id("deploy");
    let builds = harness.store.builds_of_job(job_id);
    assert_eq!(builds.len(), 1);
    assert_eq!(builds[0].status, BuildStatus::Scheduled);
    assert_eq!(harness.engine.created(), vec![builds[0].id]);
    assert_eq!(
        harness.store.inputs_of_build(builds[0].id),
        vec![("in".to_string(), v3)]
    );

    // The same versions on the next tick are no longer a first occurrence,
    // so no second build appears.
    harness.scheduler.schedule(pid, INTERVAL).await.unwrap();
    assert_eq!(harness.store.builds_of_job(job_id).len(), 1);
}

#[tokio::test]
async fn test_no_pending_build_when_trigger_is_false() {
    let harness = TestHarness::new();
    let pid = harness.store.add_pipeline(pipeline(
        "main",
        vec![job("deploy", vec![input("in", "repo")])],
        vec!["repo"],
    ));
    harness.store.add_version("repo", 1);

    harness.scheduler.schedule(pid, INTERVAL).await.unwrap();

    let job_id = harness.store.job_id("deploy");
    assert!(harness.store.builds_of_job(job_id).is_empty());
    // The mapping is still computed and persisted.
    assert!(harness.store.next_mapping(job_id).is_some());
}

#[tokio::test]
async fn test_scheduling_lease_contention_is_a_clean_noop() {
    let one = TestHarness::new();
    let pid = one.store.add_pipeline(pipeline(
        "main",
        vec![job("deploy", vec![trigger_input("in", "repo")])],
        vec!["repo"],
    ));
    one.store.add_version("repo", 1);

    // Another process holds the scheduling lease for this pipeline.
    let other = TestHarness::with_parts(one.store.clone(), one.locks.clone());
    let held = other.leases.scheduling(pid, INTERVAL);
    assert!(held.acquire().await.unwrap());

    one.scheduler.schedule(pid, INTERVAL).await.unwrap();

    let job_id = one.store.job_id("deploy");
    assert!(one.store.builds_of_job(job_id).is_empty());

    // After the holder releases, the next tick proceeds.
    held.release().await.unwrap();
    one.scheduler.schedule(pid, INTERVAL).await.unwrap();
    assert_eq!(one.store.builds_of_job(job_id).len(), 1);
}

#[tokio::test]
async fn test_removed_pipeline_is_a_noop() {
    let harness = TestHarness::new();
    harness
        .scheduler
        .schedule(ferrite_core::ids::PipelineId(999), INTERVAL)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_paused_pipeline_maps_inputs_but_starts_nothing() {
    let harness = TestHarness::new();
    let pid = harness.store.add_pipeline(pipeline(
        "main",
        vec![job("deploy", vec![trigger_input("in", "repo")])],
        vec!["repo"],
    ));
    harness.store.add_version("repo", 1);
    harness.store.pause_pipeline(pid);

    harness.scheduler.schedule(pid, INTERVAL).await.unwrap();

    let job_id = harness.store.job_id("deploy");
    // The pending build exists, its inputs resolved, but nothing started.
    let builds = harness.store.builds_of_job(job_id);
    assert_eq!(builds.len(), 1);
    assert_eq!(builds[0].status, BuildStatus::Pending);
    assert!(harness.store.next_mapping(job_id).is_some());
    assert!(harness.engine.created().is_empty());
}

#[tokio::test]
async fn test_per_job_failure_does_not_stop_the_tick() {
    let harness = TestHarness::new();
    // The first job references a resource the pipeline does not declare.
    let pid = harness.store.add_pipeline(pipeline(
        "main",
        vec![
            job("broken", vec![trigger_input("in", "missing")]),
            job("healthy", vec![trigger_input("in", "repo")]),
        ],
        vec!["repo"],
    ));
    harness.store.add_version("repo", 1);

    harness.scheduler.schedule(pid, INTERVAL).await.unwrap();

    let healthy = harness.store.job_id("healthy");
    assert_eq!(harness.store.builds_of_job(healthy).len(), 1);
}

#[tokio::test]
async fn test_runner_ticks_until_shutdown() {
    let harness = TestHarness::new();
    let pid = harness.store.add_pipeline(pipeline(
        "main",
        vec![job("deploy", vec![trigger_input("in", "repo")])],
        vec!["repo"],
    ));
    harness.store.add_version("repo", 1);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    let runner = ferrite_scheduler::Runner::new(
        harness.scheduler.clone(),
        pid,
        Duration::from_millis(10),
    );
    let loop_handle = tokio::spawn(async move { runner.run(shutdown_rx).await });

    // The first tick schedules the triggered build.
    let store = harness.store.clone();
    let job_id = harness.store.job_id("deploy");
    assert!(
        wait_for(Duration::from_secs(2), || {
            !store.builds_of_job(job_id).is_empty()
        })
        .await
    );

    shutdown_tx.send(true).unwrap();
    loop_handle.await.unwrap();
}

#[tokio::test]
async fn test_trigger_immediately_scans_maps_and_starts() {
    let harness = TestHarness::new();
    let pid = harness.store.add_pipeline(pipeline(
        "main",
        vec![job(
            "deploy",
            vec![input("one", "repo"), input("two", "other")],
        )],
        vec!["repo", "other"],
    ));
    harness.store.add_version("repo", 1);
    harness.store.add_version("other", 1);

    let config = harness.store.get_pipeline_config(pid).await.unwrap().unwrap();
    let (build, waiter) = harness
        .scheduler
        .trigger_immediately(
            pid,
            config.job("deploy").unwrap(),
            &config.resources,
            &config.resource_types,
        )
        .await
        .unwrap();

    assert_eq!(build.status, BuildStatus::Pending);
    waiter.wait().await;

    let mut scanned = harness.scanner.scanned();
    scanned.sort();
    assert_eq!(scanned, vec!["other".to_string(), "repo".to_string()]);

    assert_eq!(harness.engine.created(), vec![build.id]);
    assert_eq!(
        harness.store.build(build.id).unwrap().status,
        BuildStatus::Scheduled
    );
    // The lease came off before builds started.
    let job_id = harness.store.job_id("deploy");
    assert!(!harness
        .locks
        .held(ferrite_core::ids::LockId::resource_checking_for_job(job_id)));
}

#[tokio::test]
async fn test_trigger_immediately_scan_failure_leaves_build_pending() {
    let harness = TestHarness::new();
    let pid = harness.store.add_pipeline(pipeline(
        "main",
        vec![job("deploy", vec![input("in", "repo")])],
        vec!["repo"],
    ));
    harness.store.add_version("repo", 1);
    harness.scanner.fail_on("repo");

    let config = harness.store.get_pipeline_config(pid).await.unwrap().unwrap();
    let (build, waiter) = harness
        .scheduler
        .trigger_immediately(
            pid,
            config.job("deploy").unwrap(),
            &config.resources,
            &config.resource_types,
        )
        .await
        .unwrap();
    waiter.wait().await;

    // The task aborted; a later tick may still schedule the build.
    assert_eq!(
        harness.store.build(build.id).unwrap().status,
        BuildStatus::Pending
    );
    assert!(harness.engine.created().is_empty());

    let job_id = harness.store.job_id("deploy");
    assert!(!harness
        .locks
        .held(ferrite_core::ids::LockId::resource_checking_for_job(job_id)));
}

#[tokio::test]
async fn test_trigger_immediately_skips_scan_when_lease_is_held() {
    let one = TestHarness::new();
    let pid = one.store.add_pipeline(pipeline(
        "main",
        vec![job("deploy", vec![input("in", "repo")])],
        vec!["repo"],
    ));
    one.store.add_version("repo", 1);

    // Seed the next mapping the way a previous tick would have.
    one.scheduler.schedule(pid, INTERVAL).await.unwrap();

    // Another process is already checking this job's resources.
    let other = TestHarness::with_parts(one.store.clone(), one.locks.clone());
    let job_id = one.store.job_id("deploy");
    let held = other.leases.resource_checking_for_job(job_id);
    assert!(held.acquire().await.unwrap());

    let config = one.store.get_pipeline_config(pid).await.unwrap().unwrap();
    let (build, waiter) = one
        .scheduler
        .trigger_immediately(
            pid,
            config.job("deploy").unwrap(),
            &config.resources,
            &config.resource_types,
        )
        .await
        .unwrap();
    waiter.wait().await;

    // No scan happened here, but the pending build still started from the
    // existing next mapping.
    assert!(one.scanner.scanned().is_empty());
    assert_eq!(one.engine.created(), vec![build.id]);

    held.release().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_triggers_drain_both_builds_in_order() {
    let one = TestHarness::new();
    let pid = one.store.add_pipeline(pipeline(
        "main",
        vec![job("deploy", vec![input("in", "repo")])],
        vec!["repo"],
    ));
    one.store.add_version("repo", 1);

    let other = TestHarness::with_parts(one.store.clone(), one.locks.clone());

    let config = one.store.get_pipeline_config(pid).await.unwrap().unwrap();
    let job_config = config.job("deploy").unwrap();

    let ((build_a, waiter_a), (build_b, waiter_b)) = tokio::join!(
        async {
            one.scheduler
                .trigger_immediately(pid, job_config, &config.resources, &config.resource_types)
                .await
                .unwrap()
        },
        async {
            other
                .scheduler
                .trigger_immediately(pid, job_config, &config.resources, &config.resource_types)
                .await
                .unwrap()
        },
    );

    assert_ne!(build_a.id, build_b.id);
    waiter_a.wait().await;
    waiter_b.wait().await;

    // Both builds end up scheduled, each through exactly one engine create.
    let scheduled = wait_for(Duration::from_secs(1), || {
        let a = one.store.build(build_a.id).unwrap().status;
        let b = one.store.build(build_b.id).unwrap().status;
        a == BuildStatus::Scheduled && b == BuildStatus::Scheduled
    })
    .await;
    assert!(scheduled);

    let mut created = one.engine.created();
    created.extend(other.engine.created());
    created.sort();
    assert_eq!(created, vec![build_a.id.min(build_b.id), build_a.id.max(build_b.id)]);
}

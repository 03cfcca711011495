//! Same-project serialization and start cancellation.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use loom::host::MemoryHost;
use loom::report::{LifecycleState, Outcome, Warning};
use loom::{Error, StartOptions};

use super::fixtures::{classify, project, scenario_project, TestEnv};

fn slow_project(name: &str) -> loom::ProjectSpec {
    project(&format!(
        r#"
        name = "{}"
        [hooks]
        start = "sleep 0.5"
        [[resources]]
        id = "shell"
        command = "sh"
        "#,
        name
    ))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_start_same_project_is_busy() {
    let env = TestEnv::new();
    let orchestrator = Arc::clone(&env.orchestrator);
    let spec = slow_project("busy");

    let first = {
        let orchestrator = Arc::clone(&orchestrator);
        let spec = spec.clone();
        tokio::spawn(async move { orchestrator.start(&spec, None).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;

    let err = orchestrator.start(&spec, None).await.unwrap_err();
    assert!(matches!(err, Error::ProjectBusy(ref name) if name == "busy"));
    // Stop is serialized behind the start as well.
    let err = orchestrator.stop("busy").await.unwrap_err();
    assert!(matches!(err, Error::ProjectBusy(_)));

    let summary = first.await.unwrap().unwrap();
    assert_eq!(summary.status, LifecycleState::Running);
    assert_eq!(env.owned("busy").len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_different_projects_run_in_parallel() {
    let env = TestEnv::new();
    let alpha = slow_project("alpha");
    let beta = slow_project("beta");
    let started = std::time::Instant::now();

    let (a, b) = tokio::join!(
        env.orchestrator.start(&alpha, None),
        env.orchestrator.start(&beta, None),
    );
    assert_eq!(a.unwrap().status, LifecycleState::Running);
    assert_eq!(b.unwrap().status, LifecycleState::Running);
    // Both hooks ran at the same time.
    assert!(started.elapsed() < Duration::from_millis(950));
    assert_eq!(env.owned("alpha").len(), 1);
    assert_eq!(env.owned("beta").len(), 1);
}

#[tokio::test]
async fn test_start_from_second_instance_is_rejected() {
    let env = TestEnv::new();
    env.orchestrator
        .start(&scenario_project(), None)
        .await
        .unwrap();

    let other = env.restart();
    let err = other.start(&scenario_project(), None).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyRunning(_)));

    // Stop from the other instance sees exactly what the first started.
    let summary = other.stop("p").await.unwrap();
    assert_eq!(summary.resources.len(), 3);
    assert!(env.owned("p").is_empty());
}

#[tokio::test]
async fn test_cancel_before_launch_skips_everything() {
    let env = TestEnv::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = env
        .orchestrator
        .start_with(&scenario_project(), &StartOptions::default(), cancel)
        .await
        .unwrap();

    assert!(env.host.spawned().is_empty());
    assert_eq!(summary.status, LifecycleState::Stopped);
    assert!(summary.warnings.contains(&Warning::Cancelled));
    assert!(summary
        .resources
        .iter()
        .all(|r| matches!(&r.outcome, Outcome::Failed { reason } if reason == "start cancelled")));
    assert!(env.stored("p").is_none());
    // Start and teardown announce once between them.
    assert_eq!(env.host.notifications().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_in_flight_finishes_then_tears_down() {
    let host = MemoryHost::new();
    // The browser never shows up, keeping the start busy until the attach
    // timeout.
    host.hide_spawns("cat");
    let env = TestEnv::with_host(host);

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let summary = env
        .orchestrator
        .start_with(&scenario_project(), &StartOptions::default(), cancel)
        .await
        .unwrap();

    // Everything dispatched before the cancel ran to completion, then was
    // stopped.
    assert_eq!(
        classify(&summary),
        vec![
            ("editor".to_string(), "stopped"),
            ("term".to_string(), "stopped"),
            ("browser".to_string(), "failed"),
        ]
    );
    assert_eq!(env.host.spawned().len(), 3);
    assert!(summary.warnings.contains(&Warning::Cancelled));
    assert_eq!(summary.status, LifecycleState::Stopped);
    assert!(env.owned("p").is_empty());
}

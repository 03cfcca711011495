//! Start/stop lifecycle tests.

use loom::host::{Host, HostEntity, EntityId, MemoryHost, NotifyLevel, ShutdownSignal};
use loom::report::{LifecycleState, Outcome, Warning};
use loom::store::{ProjectStatus, ResourceStatus};
use loom::tag::Tag;
use loom::Error;

use super::fixtures::{classify, live_tag, project, scenario_project, TestEnv};

#[tokio::test]
async fn test_scenario_tags_from_base_two() {
    let env = TestEnv::with_host(MemoryHost::with_current_tag(Tag::Numeric(2)));
    let summary = env
        .orchestrator
        .start(&scenario_project(), None)
        .await
        .unwrap();

    assert_eq!(summary.status, LifecycleState::Running);
    assert_eq!(live_tag(&summary, "editor"), Some(Tag::Numeric(2)));
    assert_eq!(live_tag(&summary, "term"), Some(Tag::Numeric(3)));
    assert_eq!(live_tag(&summary, "browser"), Some(Tag::Numeric(3)));
    assert!(summary.warnings.is_empty());

    // The host agrees, and every entity carries its owner.
    let mut owned = env.owned("p");
    owned.sort_by(|a, b| a.owner.cmp(&b.owner));
    let placed: Vec<(Option<String>, Option<Tag>)> =
        owned.into_iter().map(|e| (e.owner, e.tag)).collect();
    assert_eq!(
        placed,
        vec![
            (Some("p/browser".to_string()), Some(Tag::Numeric(3))),
            (Some("p/editor".to_string()), Some(Tag::Numeric(2))),
            (Some("p/term".to_string()), Some(Tag::Numeric(3))),
        ]
    );

    let state = env.stored("p").unwrap();
    assert_eq!(state.base_tag, 2);
    assert_eq!(state.status, ProjectStatus::Running);
    let ids: Vec<&str> = state.resources.iter().map(|r| r.resource_id.as_str()).collect();
    assert_eq!(ids, vec!["editor", "term", "browser"]);
}

#[tokio::test]
async fn test_overflow_clamps_and_warns() {
    let env = TestEnv::with_host(MemoryHost::with_current_tag(Tag::Numeric(5)));
    let spec = project(
        r#"
        name = "far"
        [[resources]]
        id = "logs"
        command = "sleep 600"
        placement = { relative = 8 }
        "#,
    );
    let summary = env.orchestrator.start(&spec, None).await.unwrap();

    assert_eq!(live_tag(&summary, "logs"), Some(Tag::Numeric(9)));
    assert_eq!(
        summary.warnings,
        vec![Warning::PlacementOverflow {
            resource: "logs".to_string(),
            requested: 13,
            tag: Tag::Numeric(9),
        }]
    );
    // Overflow is a warning, not a failure.
    assert_eq!(summary.status, LifecycleState::Running);
    assert_eq!(summary.failed(), 0);
}

#[tokio::test]
async fn test_named_current_tag_uses_tag_one() {
    let env = TestEnv::with_host(MemoryHost::with_current_tag(Tag::Named("scratch".to_string())));
    let spec = project(
        r#"
        name = "named"
        [[resources]]
        id = "term"
        command = "sh"
        placement = { relative = 2 }
        "#,
    );
    let summary = env.orchestrator.start(&spec, None).await.unwrap();
    assert_eq!(live_tag(&summary, "term"), Some(Tag::Numeric(3)));
    assert!(summary
        .warnings
        .contains(&Warning::NamedBaseTag { tag: "scratch".to_string() }));
    assert_eq!(env.stored("named").unwrap().base_tag, 1);
}

#[tokio::test]
async fn test_partial_failure_continues_siblings() {
    let env = TestEnv::new();
    let spec = project(
        r#"
        name = "partial"
        [[resources]]
        id = "one"
        command = "sleep 600"

        [[resources]]
        id = "two"
        command = "loom-test-no-such-binary --flag"

        [[resources]]
        id = "three"
        command = "cat"
        "#,
    );
    let summary = env.orchestrator.start(&spec, None).await.unwrap();

    assert_eq!(
        classify(&summary),
        vec![
            ("one".to_string(), "live"),
            ("two".to_string(), "failed"),
            ("three".to_string(), "live"),
        ]
    );
    assert_eq!(summary.succeeded(), 2);
    assert_eq!(summary.failed(), 1);
    assert_eq!(summary.status, LifecycleState::PartiallyFailed);
    let failures: Vec<_> = summary.failures().collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].0, "two");
    assert!(failures[0].1.contains("not executable"));

    let state = env.stored("partial").unwrap();
    assert_eq!(state.failures.len(), 1);
    assert_eq!(state.lifecycle(), LifecycleState::PartiallyFailed);

    // Status is a read-only projection of the same thing; failures that
    // never produced a record come last.
    let status = env.orchestrator.status("partial").await.unwrap();
    assert_eq!(status.status, LifecycleState::PartiallyFailed);
    assert_eq!(
        classify(&status),
        vec![
            ("one".to_string(), "live"),
            ("three".to_string(), "live"),
            ("two".to_string(), "failed"),
        ]
    );
    assert_eq!(env.stored("partial").unwrap(), state);
}

#[tokio::test]
async fn test_host_refusal_is_per_resource() {
    let host = MemoryHost::new();
    host.refuse_spawn("cat");
    let env = TestEnv::with_host(host);
    let summary = env
        .orchestrator
        .start(&scenario_project(), None)
        .await
        .unwrap();
    assert_eq!(summary.failed(), 1);
    assert!(matches!(
        summary.outcome("browser"),
        Some(Outcome::Failed { reason }) if reason.contains("refused")
    ));
}

#[tokio::test]
async fn test_attach_timeout_is_recorded_as_pending() {
    let host = MemoryHost::new();
    host.hide_spawns("cat");
    let env = TestEnv::with_host(host);
    let summary = env
        .orchestrator
        .start(&scenario_project(), None)
        .await
        .unwrap();

    assert!(matches!(
        summary.outcome("browser"),
        Some(Outcome::Failed { reason }) if reason.contains("did not appear")
    ));
    let state = env.stored("p").unwrap();
    let browser = state.resource("browser").unwrap();
    assert_eq!(browser.status, ResourceStatus::Pending);
    assert!(browser.spawn_token.is_some());
    assert_eq!(state.lifecycle(), LifecycleState::PartiallyFailed);
}

#[tokio::test]
async fn test_stop_unresponsive_resource_is_force_killed() {
    let host = MemoryHost::new();
    host.ignore_graceful("sleep");
    let env = TestEnv::with_host(host);
    let spec = project(
        r#"
        name = "stubborn"
        [[resources]]
        id = "server"
        command = "sleep 600"
        placement = { tag = "stubborn" }

        [[resources]]
        id = "shell"
        kind = "terminal"
        command = "sh"
        placement = { tag = "stubborn" }
        "#,
    );
    env.orchestrator.start(&spec, None).await.unwrap();
    assert_eq!(env.host.named_tags(), vec!["stubborn".to_string()]);

    let summary = env.orchestrator.stop("stubborn").await.unwrap();
    assert_eq!(summary.status, LifecycleState::Stopped);
    assert_eq!(
        summary.outcome("server"),
        Some(&Outcome::Stopped { forced: true })
    );
    assert_eq!(
        summary.outcome("shell"),
        Some(&Outcome::Stopped { forced: false })
    );
    assert_eq!(
        summary.warnings,
        vec![Warning::ForceKilled {
            resource: "server".to_string()
        }]
    );

    // Terminal got an interrupt, the server a terminate then a kill.
    let signals: Vec<ShutdownSignal> = env.host.signals().into_iter().map(|(_, s)| s).collect();
    assert_eq!(signals.iter().filter(|s| **s == ShutdownSignal::Interrupt).count(), 1);
    assert_eq!(signals.iter().filter(|s| **s == ShutdownSignal::Terminate).count(), 1);
    assert_eq!(signals.iter().filter(|s| **s == ShutdownSignal::Kill).count(), 1);

    assert_eq!(env.host.closed_tags(), vec![Tag::Named("stubborn".to_string())]);
    assert!(env.owned("stubborn").is_empty());
    assert!(env.stored("stubborn").is_none());
}

#[tokio::test]
async fn test_stop_leaves_numeric_tags_open() {
    let env = TestEnv::new();
    env.orchestrator
        .start(&scenario_project(), None)
        .await
        .unwrap();
    let summary = env.orchestrator.stop("p").await.unwrap();
    assert!(summary.is_clean());
    assert!(env.host.closed_tags().is_empty());

    let status = env.orchestrator.status("p").await.unwrap();
    assert_eq!(status.status, LifecycleState::Absent);
}

#[tokio::test]
async fn test_stop_skips_entity_no_longer_owned() {
    let env = TestEnv::new();
    env.orchestrator
        .start(&scenario_project(), None)
        .await
        .unwrap();
    let state = env.stored("p").unwrap();
    let editor = state
        .resource("editor")
        .unwrap()
        .host_entity_id
        .clone()
        .unwrap();
    // Something else took over the entity.
    env.host
        .set_entity_property(&editor, loom::host::OWNER_PROPERTY, "other/editor")
        .unwrap();

    env.orchestrator.stop("p").await.unwrap();
    assert!(env.host.entity(&editor).is_some());
    assert!(env.host.signals().iter().all(|(id, _)| *id != editor));
}

#[tokio::test]
async fn test_stop_when_not_running() {
    let env = TestEnv::new();
    let err = env.orchestrator.stop("ghost").await.unwrap_err();
    assert!(matches!(err, Error::NotRunning(ref name) if name == "ghost"));
}

#[tokio::test]
async fn test_restart_keeps_one_live_record_per_resource() {
    let env = TestEnv::new();
    let spec = scenario_project();
    for _ in 0..3 {
        env.orchestrator.start(&spec, None).await.unwrap();
        let state = env.stored("p").unwrap();
        for resource in &spec.resources {
            let live = state
                .resources
                .iter()
                .filter(|r| r.resource_id == resource.id && r.is_live())
                .count();
            assert_eq!(live, 1, "resource {}", resource.id);
        }
        assert_eq!(env.owned("p").len(), 3);
        env.orchestrator.stop("p").await.unwrap();
        assert!(env.owned("p").is_empty());
    }
}

#[tokio::test]
async fn test_second_start_is_rejected() {
    let env = TestEnv::new();
    let spec = scenario_project();
    env.orchestrator.start(&spec, None).await.unwrap();
    let err = env.orchestrator.start(&spec, None).await.unwrap_err();
    assert!(matches!(err, Error::AlreadyRunning(ref name) if name == "p"));
    assert_eq!(env.owned("p").len(), 3);
}

#[tokio::test]
async fn test_one_notification_per_command() {
    let env = TestEnv::new();
    env.orchestrator
        .start(&scenario_project(), None)
        .await
        .unwrap();
    let notes = env.host.notifications();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].0, NotifyLevel::Info);
    assert!(notes[0].1.starts_with("start p: running"));

    env.orchestrator.stop("p").await.unwrap();
    assert_eq!(env.host.notifications().len(), 2);
}

#[tokio::test]
async fn test_hooks_are_best_effort() {
    let env = TestEnv::new();
    let workdir = env.workdir();
    let spec = project(&format!(
        r#"
        name = "hooked"
        workdir = "{}"

        [hooks]
        start = "echo setup failed >&2; exit 2"
        stop = "echo \"$LOOM_PROJECT\" > stopped.txt"

        [[resources]]
        id = "shell"
        command = "sh"
        "#,
        workdir.display()
    ));

    let summary = env.orchestrator.start(&spec, None).await.unwrap();
    assert_eq!(classify(&summary), vec![("shell".to_string(), "live")]);
    assert!(matches!(
        summary.warnings.as_slice(),
        [Warning::HookFailure { hook, reason }] if hook == "start" && reason.contains("setup failed")
    ));
    assert_eq!(env.host.notifications()[0].0, NotifyLevel::Warning);
    // A failed hook marks the project partially failed, now and on disk.
    assert_eq!(summary.status, LifecycleState::PartiallyFailed);
    let status = env.orchestrator.status("hooked").await.unwrap();
    assert_eq!(status.status, LifecycleState::PartiallyFailed);
    assert!(matches!(
        status.warnings.as_slice(),
        [Warning::HookFailure { hook, .. }] if hook == "start"
    ));

    // The stop hook comes from the persisted state, not the spec.
    let stop = env.orchestrator.stop("hooked").await.unwrap();
    assert!(stop.warnings.is_empty());
    let marker = std::fs::read_to_string(workdir.join("stopped.txt")).unwrap();
    assert_eq!(marker.trim(), "hooked");
}

#[tokio::test]
async fn test_failed_stop_hook_keeps_record() {
    let env = TestEnv::new();
    let spec = project(
        r#"
        name = "keep"
        [hooks]
        stop = "exit 1"
        [[resources]]
        id = "shell"
        command = "sh"
        "#,
    );
    env.orchestrator.start(&spec, None).await.unwrap();
    let summary = env.orchestrator.stop("keep").await.unwrap();
    assert_eq!(summary.status, LifecycleState::Stopped);
    assert!(matches!(summary.warnings[0], Warning::HookFailure { .. }));

    let state = env.stored("keep").unwrap();
    assert_eq!(state.status, ProjectStatus::Stopped);
    assert_eq!(state.live_count(), 0);
    assert_eq!(state.hook_failures.len(), 1);
    assert_eq!(state.hook_failures[0].hook, "stop");

    // A stopped record does not block the next start.
    let restarted = env.orchestrator.start(&spec, None).await.unwrap();
    assert_eq!(restarted.status, LifecycleState::Running);
}

#[tokio::test]
async fn test_reuse_binds_existing_entity() {
    let env = TestEnv::new();
    let workdir = env.workdir();
    let existing = env.host.add_entity(HostEntity {
        id: EntityId::new("%42"),
        pid: Some(4242),
        tag: Some(Tag::Numeric(1)),
        title: "notes".to_string(),
        workdir: Some(workdir.clone()),
        command: "sh".to_string(),
        owner: None,
        spawn_token: None,
    });
    let foreign = env.host.add_entity(HostEntity {
        id: EntityId::new("%43"),
        pid: Some(4343),
        tag: Some(Tag::Numeric(1)),
        title: "notes".to_string(),
        workdir: Some(workdir.clone()),
        command: "sh".to_string(),
        owner: Some("other/shell".to_string()),
        spawn_token: None,
    });
    let spec = project(&format!(
        r#"
        name = "reuse"
        workdir = "{}"

        [[resources]]
        id = "shell"
        command = "sh"
        placement = {{ absolute = "4" }}
        reuse = {{ policy = "reuse-if-match", match = "title", pattern = "^notes$" }}

        [[resources]]
        id = "second"
        command = "sh"
        reuse = {{ policy = "reuse-if-match", match = "workdir" }}
        "#,
        workdir.display()
    ));

    let summary = env.orchestrator.start(&spec, None).await.unwrap();
    assert!(matches!(
        summary.outcome("shell"),
        Some(Outcome::Live { entity, reused: true, tag }) if *entity == existing && *tag == Tag::Numeric(4)
    ));
    // Only the foreign entity matches the workdir; it is never taken.
    assert!(matches!(
        summary.outcome("second"),
        Some(Outcome::Live { reused: false, .. })
    ));
    assert_eq!(env.host.spawned().len(), 1);

    let reused = env.host.entity(&existing).unwrap();
    assert_eq!(reused.owner.as_deref(), Some("reuse/shell"));
    assert_eq!(reused.tag, Some(Tag::Numeric(4)));
    assert_eq!(
        env.host.entity(&foreign).unwrap().owner.as_deref(),
        Some("other/shell")
    );
}

#[tokio::test]
async fn test_layout_overrides_placement() {
    let env = TestEnv::with_host(MemoryHost::with_current_tag(Tag::Numeric(2)));
    let spec = project(
        r#"
        name = "laid"
        [[resources]]
        id = "editor"
        command = "sleep 600"
        placement = { relative = 0 }

        [[resources]]
        id = "docs"
        command = "cat"
        placement = { relative = 1 }

        [layouts.review]
        docs = { tag = "review" }
        "#,
    );
    let summary = env.orchestrator.start(&spec, Some("review")).await.unwrap();
    assert_eq!(live_tag(&summary, "editor"), Some(Tag::Numeric(2)));
    assert_eq!(live_tag(&summary, "docs"), Some(Tag::Named("review".to_string())));

    let err = env.orchestrator.start(&spec, Some("missing")).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
}

#[tokio::test]
async fn test_invalid_project_rejected_before_spawn() {
    let env = TestEnv::new();
    let mut spec = scenario_project();
    let duplicate = spec.resources[0].clone();
    spec.resources.push(duplicate);

    let err = env.orchestrator.start(&spec, None).await.unwrap_err();
    assert!(matches!(err, Error::Validation(_)));
    assert!(env.host.spawned().is_empty());
    assert!(env.stored("p").is_none());
}

#[tokio::test]
async fn test_corrupt_state_is_reset_with_warning() {
    let env = TestEnv::new();
    std::fs::create_dir_all(env.state_dir()).unwrap();
    std::fs::write(env.state_dir().join("p.json"), "{\"project_name\": 3").unwrap();

    let status = env.orchestrator.status("p").await.unwrap();
    assert_eq!(status.status, LifecycleState::Absent);
    assert!(matches!(
        status.warnings.as_slice(),
        [Warning::StoreCorruption { project, .. }] if project == "p"
    ));

    let summary = env
        .orchestrator
        .start(&scenario_project(), None)
        .await
        .unwrap();
    assert_eq!(summary.status, LifecycleState::Running);
    assert!(summary
        .warnings
        .iter()
        .any(|w| matches!(w, Warning::StoreCorruption { .. })));
    assert!(env.state_dir().join("p.json.corrupt").exists());
}

//! Resume/reconcile tests.

use loom::host::{EntityId, Host, HostEntity, MemoryHost, SpawnRequest, SpawnToken};
use loom::report::{LifecycleState, Outcome, Warning};
use loom::store::{ProjectState, ProjectStatus, ResourceStatus, TrackedResource};
use loom::tag::{Placement, Tag};
use loom::{Error, StateStore};

use super::fixtures::{classify, live_tag, scenario_project, TestEnv};

fn entity_of(env: &TestEnv, project: &str, resource: &str) -> EntityId {
    env.stored(project)
        .unwrap()
        .resource(resource)
        .unwrap()
        .host_entity_id
        .clone()
        .unwrap()
}

#[tokio::test]
async fn test_resume_after_restart_reattaches_everything() {
    let env = TestEnv::with_host(MemoryHost::with_current_tag(Tag::Numeric(2)));
    env.orchestrator
        .start(&scenario_project(), None)
        .await
        .unwrap();
    let before = env.stored("p").unwrap();

    // A fresh process knows nothing but the store and the host.
    let restarted = env.restart();
    let summary = restarted.resume("p").await.unwrap();

    assert_eq!(summary.status, LifecycleState::Running);
    assert_eq!(
        classify(&summary),
        vec![
            ("editor".to_string(), "live"),
            ("term".to_string(), "live"),
            ("browser".to_string(), "live"),
        ]
    );
    assert!(summary.warnings.is_empty());

    let after = env.stored("p").unwrap();
    for (old, new) in before.resources.iter().zip(&after.resources) {
        assert_eq!(old.host_entity_id, new.host_entity_id);
        assert_eq!(old.tag, new.tag);
    }
}

#[tokio::test]
async fn test_missing_entity_becomes_orphaned() {
    let env = TestEnv::new();
    env.orchestrator
        .start(&scenario_project(), None)
        .await
        .unwrap();
    let term = entity_of(&env, "p", "term");
    assert!(env.host.close_entity(&term));

    let summary = env.restart().resume("p").await.unwrap();
    assert_eq!(summary.outcome("term"), Some(&Outcome::Orphaned));
    assert!(matches!(summary.outcome("editor"), Some(Outcome::Live { .. })));
    assert_eq!(
        summary.warnings,
        vec![Warning::Orphaned {
            resource: "term".to_string()
        }]
    );
    // Orphans are reported, never respawned.
    assert_eq!(env.host.spawned().len(), 3);

    let state = env.stored("p").unwrap();
    assert_eq!(
        state.resource("term").unwrap().status,
        ResourceStatus::Orphaned
    );
}

#[tokio::test]
async fn test_resume_is_idempotent() {
    let env = TestEnv::new();
    env.orchestrator
        .start(&scenario_project(), None)
        .await
        .unwrap();
    let browser = entity_of(&env, "p", "browser");
    env.host.close_entity(&browser);

    let restarted = env.restart();
    let first = restarted.resume("p").await.unwrap();
    let state_after_first = env.stored("p").unwrap();
    let second = restarted.resume("p").await.unwrap();
    let state_after_second = env.stored("p").unwrap();

    assert_eq!(classify(&first), classify(&second));
    assert_eq!(first.resources, second.resources);
    assert_eq!(first.warnings, second.warnings);
    assert_eq!(state_after_first.resources, state_after_second.resources);
}

#[tokio::test]
async fn test_resume_restores_tags() {
    let env = TestEnv::with_host(MemoryHost::with_current_tag(Tag::Numeric(2)));
    env.orchestrator
        .start(&scenario_project(), None)
        .await
        .unwrap();
    let term = entity_of(&env, "p", "term");
    env.host
        .assign_entity_to_tag(&term, &Tag::Numeric(7))
        .unwrap();
    // The user switched tags since; resume still uses the recorded base.
    env.host.set_current_tag(Tag::Numeric(5));

    let summary = env.restart().resume("p").await.unwrap();
    assert_eq!(live_tag(&summary, "term"), Some(Tag::Numeric(3)));
    assert_eq!(env.host.entity(&term).unwrap().tag, Some(Tag::Numeric(3)));
}

#[tokio::test]
async fn test_untracked_owned_entity_is_reported() {
    let env = TestEnv::new();
    env.orchestrator
        .start(&scenario_project(), None)
        .await
        .unwrap();
    let stray = env.host.add_entity(HostEntity {
        id: EntityId::new("%99"),
        pid: None,
        tag: Some(Tag::Numeric(1)),
        title: "leftover".to_string(),
        workdir: None,
        command: "sh".to_string(),
        owner: Some("p/old-shell".to_string()),
        spawn_token: None,
    });

    let summary = env.restart().resume("p").await.unwrap();
    assert_eq!(
        summary.warnings,
        vec![Warning::UntrackedEntity {
            entity: stray,
            owner: "p/old-shell".to_string()
        }]
    );
    assert_eq!(summary.resources.len(), 3);
}

#[tokio::test]
async fn test_resume_recovers_crash_between_spawn_and_attach() {
    let env = TestEnv::new();
    let host = &env.host;

    // The previous process spawned the resource and died before attaching.
    let token = SpawnToken::new("crashed", "shell");
    host.spawn(&SpawnRequest {
        token: token.clone(),
        argv: vec!["sh".to_string()],
        env: Vec::new(),
        workdir: None,
    })
    .unwrap();
    let store = StateStore::new(env.state_dir());
    store
        .commit("crashed", |state| {
            let mut s = ProjectState::starting("crashed", 1);
            s.upsert_resource(TrackedResource {
                project_name: "crashed".to_string(),
                resource_id: "shell".to_string(),
                host_entity_id: None,
                tag: Tag::Numeric(2),
                status: ResourceStatus::Pending,
                pid: None,
                spawn_token: Some(token),
                placement: Placement::Relative(1),
                interactive: false,
                reused: false,
            });
            *state = Some(s);
            Ok(())
        })
        .unwrap();

    let summary = env.orchestrator.resume("crashed").await.unwrap();
    assert_eq!(classify(&summary), vec![("shell".to_string(), "live")]);
    assert_eq!(summary.status, LifecycleState::Running);

    let owned = env.owned("crashed");
    assert_eq!(owned.len(), 1);
    assert_eq!(owned[0].owner.as_deref(), Some("crashed/shell"));
    assert_eq!(owned[0].tag, Some(Tag::Numeric(2)));
    assert_eq!(
        env.stored("crashed").unwrap().status,
        ProjectStatus::Running
    );

    // Once resumed it stops like any other project.
    env.orchestrator.stop("crashed").await.unwrap();
    assert!(env.owned("crashed").is_empty());
}

#[tokio::test]
async fn test_resume_unknown_project() {
    let env = TestEnv::new();
    let err = env.orchestrator.resume("nothing").await.unwrap_err();
    assert!(matches!(err, Error::NotRunning(_)));
}

#[tokio::test]
async fn test_resume_all_and_status_all() {
    let env = TestEnv::new();
    env.orchestrator
        .start(&scenario_project(), None)
        .await
        .unwrap();
    let mut other = scenario_project();
    other.name = "q".to_string();
    env.orchestrator.start(&other, None).await.unwrap();

    let restarted = env.restart();
    let results = restarted.resume_all().await.unwrap();
    let names: Vec<&str> = results.iter().map(|(name, _)| name.as_str()).collect();
    assert_eq!(names, vec!["p", "q"]);
    assert!(results.iter().all(|(_, r)| r.is_ok()));

    let statuses = restarted.status_all().await.unwrap();
    assert_eq!(statuses.len(), 2);
    assert!(statuses
        .iter()
        .all(|s| s.status == LifecycleState::Running && s.resources.len() == 3));
}

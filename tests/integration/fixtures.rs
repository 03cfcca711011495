//! Test fixtures for integration tests.
//!
//! Provides helpers for:
//! - An orchestrator wired to a `MemoryHost` and a temporary store
//! - Simulating an orchestrator restart over the same host and store
//! - Predefined projects

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;

use loom::config::LifecycleSettings;
use loom::host::{EntityFilter, Host, HostEntity, MemoryHost};
use loom::report::Outcome;
use loom::store::ProjectState;
use loom::{OperationSummary, Orchestrator, ProjectSpec, StateStore};

/// Timings short enough to keep the suite fast.
pub fn test_settings() -> LifecycleSettings {
    LifecycleSettings {
        attach_timeout: Duration::from_millis(300),
        hook_timeout: Duration::from_secs(5),
        grace_period: Duration::from_millis(200),
        poll_interval: Duration::from_millis(10),
    }
}

/// An orchestrator over an in-memory host and a temporary state directory.
pub struct TestEnv {
    /// Holds the state directory (and project workdirs) alive.
    pub temp_dir: TempDir,
    pub host: Arc<MemoryHost>,
    pub orchestrator: Arc<Orchestrator>,
}

impl TestEnv {
    pub fn new() -> Self {
        Self::with_host(MemoryHost::new())
    }

    pub fn with_host(host: MemoryHost) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let host = Arc::new(host);
        let orchestrator = Arc::new(Self::build(&host, &temp_dir));
        Self {
            temp_dir,
            host,
            orchestrator,
        }
    }

    fn build(host: &Arc<MemoryHost>, temp_dir: &TempDir) -> Orchestrator {
        let store = StateStore::new(temp_dir.path().join("state"));
        Orchestrator::new(host.clone(), store, test_settings())
    }

    /// A second orchestrator sharing this host and store, as after a
    /// process restart.
    pub fn restart(&self) -> Orchestrator {
        Self::build(&self.host, &self.temp_dir)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.temp_dir.path().join("state")
    }

    /// A directory that exists, for use as a project workdir.
    pub fn workdir(&self) -> PathBuf {
        let dir = self.temp_dir.path().join("work");
        std::fs::create_dir_all(&dir).expect("Failed to create workdir");
        dir
    }

    pub fn stored(&self, project: &str) -> Option<ProjectState> {
        StateStore::new(self.state_dir())
            .get(project)
            .expect("Failed to read state")
    }

    /// Entities on the host owned by `project`.
    pub fn owned(&self, project: &str) -> Vec<HostEntity> {
        self.host
            .list_entities(&EntityFilter::project(project))
            .expect("Failed to list entities")
    }
}

pub fn project(toml: &str) -> ProjectSpec {
    ProjectSpec::from_toml_str(toml).expect("Invalid project")
}

/// editor@relative 0, term@relative 1, browser@absolute "3".
pub fn scenario_project() -> ProjectSpec {
    project(
        r#"
        name = "p"

        [[resources]]
        id = "editor"
        kind = "editor"
        command = "sleep 600"
        placement = { relative = 0 }

        [[resources]]
        id = "term"
        kind = "terminal"
        command = "sh"
        placement = { relative = 1 }

        [[resources]]
        id = "browser"
        kind = "browser"
        command = "cat"
        urls = ["http://localhost:3000"]
        placement = { absolute = "3" }
        "#,
    )
}

/// Short classification of each outcome, for comparisons.
pub fn classify(summary: &OperationSummary) -> Vec<(String, &'static str)> {
    summary
        .resources
        .iter()
        .map(|r| {
            let kind = match &r.outcome {
                Outcome::Live { .. } => "live",
                Outcome::Pending => "pending",
                Outcome::Stopped { .. } => "stopped",
                Outcome::Orphaned => "orphaned",
                Outcome::Failed { .. } => "failed",
            };
            (r.resource_id.clone(), kind)
        })
        .collect()
}

pub fn live_tag(summary: &OperationSummary, resource: &str) -> Option<loom::tag::Tag> {
    match summary.outcome(resource)? {
        Outcome::Live { tag, .. } => Some(tag.clone()),
        _ => None,
    }
}

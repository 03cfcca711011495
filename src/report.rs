//! Operation summaries.
//!
//! Every lifecycle command returns an [`OperationSummary`], even when some
//! resources failed: ordered per-resource outcomes plus warnings.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::host::EntityId;
use crate::tag::Tag;

/// Non-fatal conditions surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Warning {
    /// A numeric placement fell outside `1..=9` and was clamped.
    PlacementOverflow {
        resource: String,
        requested: i64,
        tag: Tag,
    },
    /// The host's current tag is named; relative placements used tag 1.
    NamedBaseTag { tag: String },
    HookFailure { hook: String, reason: String },
    StoreCorruption { project: String, reason: String },
    /// A resource ignored its graceful signal and was killed.
    ForceKilled { resource: String },
    /// A tracked resource has no live entity on the host.
    Orphaned { resource: String },
    /// A host entity claims this project but is not tracked.
    UntrackedEntity { entity: EntityId, owner: String },
    TagAssignment { resource: String, reason: String },
    TagClose { tag: Tag, reason: String },
    /// An intermediate state commit failed; the final commit still ran.
    StateCommit { resource: String, reason: String },
    /// The start was cancelled and the project torn down.
    Cancelled,
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Warning::PlacementOverflow {
                resource,
                requested,
                tag,
            } => write!(
                f,
                "resource '{}' asked for tag {} which is out of range; placed on tag {}",
                resource, requested, tag
            ),
            Warning::NamedBaseTag { tag } => write!(
                f,
                "current tag '{}' is named; relative placements resolved from tag 1",
                tag
            ),
            Warning::HookFailure { hook, reason } => write!(f, "{} hook failed: {}", hook, reason),
            Warning::StoreCorruption { project, reason } => write!(
                f,
                "state for '{}' was unreadable and has been reset: {}",
                project, reason
            ),
            Warning::ForceKilled { resource } => write!(
                f,
                "resource '{}' did not exit after its grace period and was force-killed",
                resource
            ),
            Warning::Orphaned { resource } => write!(
                f,
                "resource '{}' is no longer running on the host; not respawned",
                resource
            ),
            Warning::UntrackedEntity { entity, owner } => write!(
                f,
                "entity {} claims '{}' but is not tracked",
                entity, owner
            ),
            Warning::TagAssignment { resource, reason } => write!(
                f,
                "could not move resource '{}' to its tag: {}",
                resource, reason
            ),
            Warning::TagClose { tag, reason } => {
                write!(f, "could not close tag '{}': {}", tag, reason)
            }
            Warning::StateCommit { resource, reason } => write!(
                f,
                "could not record resource '{}' immediately: {}",
                resource, reason
            ),
            Warning::Cancelled => write!(f, "start was cancelled; project torn down"),
        }
    }
}

/// Externally visible lifecycle state of a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LifecycleState {
    Absent,
    Starting,
    Running,
    PartiallyFailed,
    Stopping,
    Stopped,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            LifecycleState::Absent => "absent",
            LifecycleState::Starting => "starting",
            LifecycleState::Running => "running",
            LifecycleState::PartiallyFailed => "partially-failed",
            LifecycleState::Stopping => "stopping",
            LifecycleState::Stopped => "stopped",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Start,
    Stop,
    Status,
    Resume,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Start => "start",
            Operation::Stop => "stop",
            Operation::Status => "status",
            Operation::Resume => "resume",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum Outcome {
    Live {
        tag: Tag,
        entity: EntityId,
        #[serde(default)]
        reused: bool,
    },
    Pending,
    Stopped {
        #[serde(default)]
        forced: bool,
    },
    Orphaned,
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceOutcome {
    pub resource_id: String,
    #[serde(flatten)]
    pub outcome: Outcome,
}

impl ResourceOutcome {
    pub fn new(resource_id: impl Into<String>, outcome: Outcome) -> Self {
        Self {
            resource_id: resource_id.into(),
            outcome,
        }
    }

    pub fn failed(resource_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::new(
            resource_id,
            Outcome::Failed {
                reason: reason.into(),
            },
        )
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, Outcome::Failed { .. })
    }
}

/// Result of one lifecycle command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationSummary {
    pub project: String,
    pub operation: Operation,
    pub status: LifecycleState,
    /// Per-resource outcomes in declared order.
    pub resources: Vec<ResourceOutcome>,
    pub warnings: Vec<Warning>,
}

impl OperationSummary {
    pub fn new(project: impl Into<String>, operation: Operation, status: LifecycleState) -> Self {
        Self {
            project: project.into(),
            operation,
            status,
            resources: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// Number of resources that did not fail.
    pub fn succeeded(&self) -> usize {
        self.resources.len() - self.failed()
    }

    pub fn failed(&self) -> usize {
        self.resources.iter().filter(|r| r.is_failure()).count()
    }

    pub fn failures(&self) -> impl Iterator<Item = (&str, &str)> {
        self.resources.iter().filter_map(|r| match &r.outcome {
            Outcome::Failed { reason } => Some((r.resource_id.as_str(), reason.as_str())),
            _ => None,
        })
    }

    pub fn is_clean(&self) -> bool {
        self.failed() == 0 && self.warnings.is_empty()
    }

    pub fn outcome(&self, resource_id: &str) -> Option<&Outcome> {
        self.resources
            .iter()
            .find(|r| r.resource_id == resource_id)
            .map(|r| &r.outcome)
    }

    /// One-line description used for host notifications.
    pub fn headline(&self) -> String {
        let mut line = format!(
            "{} {}: {} ({} ok, {} failed)",
            self.operation,
            self.project,
            self.status,
            self.succeeded(),
            self.failed()
        );
        if !self.warnings.is_empty() {
            line.push_str(&format!(", {} warning(s)", self.warnings.len()));
        }
        line
    }
}

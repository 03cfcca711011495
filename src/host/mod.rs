//! Host capability interface.
//!
//! The window-manager host owns tags and entities; loom only drives it
//! through [`Host`]. Ownership is recorded as durable entity properties so a
//! restarted orchestrator can rediscover its entities by scanning the host.

pub mod memory;
pub mod tmux;

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::tag::Tag;
use crate::Result;

pub use memory::MemoryHost;
pub use tmux::TmuxHost;

/// Entity property naming the owning `project/resource`.
pub const OWNER_PROPERTY: &str = "loom_owner";
/// Entity property carrying the spawn correlation token.
pub const SPAWN_PROPERTY: &str = "loom_spawn";

/// Environment variables set on every spawned resource.
pub const PROJECT_ENV: &str = "LOOM_PROJECT";
pub const RESOURCE_ENV: &str = "LOOM_RESOURCE";
pub const SPAWN_TOKEN_ENV: &str = "LOOM_SPAWN_TOKEN";

/// Opaque host identity of a window/process.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Correlation token linking a spawn request to the entity it produces.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SpawnToken(pub String);

impl SpawnToken {
    pub fn new(project: &str, resource: &str) -> Self {
        let id = Uuid::new_v4().to_string();
        Self(format!("{}/{}/{}", project, resource, &id[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SpawnToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Value stored under [`OWNER_PROPERTY`].
pub fn owner_key(project: &str, resource: &str) -> String {
    format!("{}/{}", project, resource)
}

/// Split an owner value into `(project, resource)`.
pub fn parse_owner(value: &str) -> Option<(&str, &str)> {
    let (project, resource) = value.split_once('/')?;
    if project.is_empty() || resource.is_empty() || resource.contains('/') {
        return None;
    }
    Some((project, resource))
}

/// Snapshot of one host entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostEntity {
    pub id: EntityId,
    pub pid: Option<u32>,
    pub tag: Option<Tag>,
    pub title: String,
    pub workdir: Option<PathBuf>,
    /// Name of the program currently running in the entity.
    pub command: String,
    /// Value of [`OWNER_PROPERTY`], if set.
    pub owner: Option<String>,
    /// Value of [`SPAWN_PROPERTY`], if set.
    pub spawn_token: Option<String>,
}

impl HostEntity {
    pub fn owner_project(&self) -> Option<&str> {
        self.owner.as_deref().and_then(parse_owner).map(|(p, _)| p)
    }
}

/// Selects entities in [`Host::list_entities`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityFilter {
    pub owner_project: Option<String>,
    pub owner: Option<String>,
    pub spawn_token: Option<String>,
}

impl EntityFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn project(project: &str) -> Self {
        Self {
            owner_project: Some(project.to_string()),
            ..Self::default()
        }
    }

    pub fn owner(project: &str, resource: &str) -> Self {
        Self {
            owner: Some(owner_key(project, resource)),
            ..Self::default()
        }
    }

    pub fn spawn_token(token: &SpawnToken) -> Self {
        Self {
            spawn_token: Some(token.0.clone()),
            ..Self::default()
        }
    }

    pub fn matches(&self, entity: &HostEntity) -> bool {
        if let Some(project) = &self.owner_project {
            if entity.owner_project() != Some(project.as_str()) {
                return false;
            }
        }
        if let Some(owner) = &self.owner {
            if entity.owner.as_ref() != Some(owner) {
                return false;
            }
        }
        if let Some(token) = &self.spawn_token {
            if entity.spawn_token.as_ref() != Some(token) {
                return false;
            }
        }
        true
    }
}

/// What to launch for a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub token: SpawnToken,
    pub argv: Vec<String>,
    pub env: Vec<(String, String)>,
    pub workdir: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownSignal {
    /// Polite stop for interactive programs (Ctrl-C).
    Interrupt,
    Terminate,
    Kill,
}

impl ShutdownSignal {
    pub fn as_libc(&self) -> i32 {
        match self {
            ShutdownSignal::Interrupt => libc::SIGINT,
            ShutdownSignal::Terminate => libc::SIGTERM,
            ShutdownSignal::Kill => libc::SIGKILL,
        }
    }

    pub fn is_graceful(&self) -> bool {
        !matches!(self, ShutdownSignal::Kill)
    }
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::Interrupt => write!(f, "SIGINT"),
            ShutdownSignal::Terminate => write!(f, "SIGTERM"),
            ShutdownSignal::Kill => write!(f, "SIGKILL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotifyLevel {
    Info,
    Warning,
    Error,
}

/// Capabilities loom needs from the window-manager host.
///
/// Calls are synchronous; async callers go through
/// [`crate::util::blocking`].
pub trait Host: Send + Sync {
    fn get_current_tag(&self) -> Result<Tag>;

    /// Ensure a named tag exists.
    fn create_tag(&self, name: &str) -> Result<Tag>;

    /// Destroy a named tag. Numeric tags are shared and left alone.
    fn close_tag(&self, tag: &Tag) -> Result<()>;

    fn assign_entity_to_tag(&self, entity: &EntityId, tag: &Tag) -> Result<()>;

    fn list_entities(&self, filter: &EntityFilter) -> Result<Vec<HostEntity>>;

    /// Launch a resource. The entity appears asynchronously carrying
    /// `request.token` as its [`SPAWN_PROPERTY`].
    fn spawn(&self, request: &SpawnRequest) -> Result<SpawnToken>;

    fn set_entity_property(&self, entity: &EntityId, key: &str, value: &str) -> Result<()>;

    fn get_entity_property(&self, entity: &EntityId, key: &str) -> Result<Option<String>>;

    fn signal_entity(&self, entity: &EntityId, signal: ShutdownSignal) -> Result<()>;

    fn entity_alive(&self, entity: &EntityId) -> Result<bool>;

    fn notify(&self, message: &str, level: NotifyLevel) -> Result<()>;
}

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Tmux error: {0}")]
    Tmux(String),

    #[error("Host error: {0}")]
    Host(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Failed to spawn resource '{resource}': {reason}")]
    SpawnFailure { resource: String, reason: String },

    #[error("Resource '{resource}' did not appear within {timeout:?}")]
    AttachTimeout { resource: String, timeout: Duration },

    #[error("Hook '{hook}' failed: {reason}")]
    HookFailure { hook: String, reason: String },

    #[error("Failed to write state for project '{project}': {reason}")]
    StoreWrite { project: String, reason: String },

    #[error("Project already running: {0}")]
    AlreadyRunning(String),

    #[error("Another command is in progress for project: {0}")]
    ProjectBusy(String),

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Project is not running: {0}")]
    NotRunning(String),

    #[error("No home directory")]
    NoHomeDir,

    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Task join error: {0}")]
    TaskJoin(String),
}

pub type Result<T> = std::result::Result<T, Error>;

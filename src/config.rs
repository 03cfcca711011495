use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::{Error, Result};

const DEFAULT_SESSION: &str = "loom";
const DEFAULT_ATTACH_TIMEOUT_SECS: u64 = 10;
const DEFAULT_HOOK_TIMEOUT_SECS: u64 = 30;
const DEFAULT_GRACE_PERIOD_SECS: u64 = 5;
const DEFAULT_POLL_INTERVAL_MS: u64 = 100;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// tmux session acting as the tag surface.
    pub session: Option<String>,
    pub projects_dir: Option<String>,
    pub state_dir: Option<String>,
    pub attach_timeout_secs: Option<u64>,
    pub hook_timeout_secs: Option<u64>,
    pub grace_period_secs: Option<u64>,
    pub poll_interval_ms: Option<u64>,
}

/// Timing knobs for the lifecycle orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleSettings {
    /// How long the tracker waits for a spawned entity to appear.
    pub attach_timeout: Duration,
    /// How long a start/stop hook may run before it counts as failed.
    pub hook_timeout: Duration,
    /// How long a resource gets to exit after a graceful signal.
    pub grace_period: Duration,
    /// Interval between host inventory polls while waiting.
    pub poll_interval: Duration,
}

impl Default for LifecycleSettings {
    fn default() -> Self {
        Self {
            attach_timeout: Duration::from_secs(DEFAULT_ATTACH_TIMEOUT_SECS),
            hook_timeout: Duration::from_secs(DEFAULT_HOOK_TIMEOUT_SECS),
            grace_period: Duration::from_secs(DEFAULT_GRACE_PERIOD_SECS),
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
        }
    }
}

impl Config {
    pub fn loom_dir() -> Result<PathBuf> {
        Ok(dirs::home_dir().ok_or(Error::NoHomeDir)?.join(".loom"))
    }

    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::loom_dir()?.join("loom.toml"))
    }

    pub fn effective_session(&self) -> &str {
        self.session.as_deref().unwrap_or(DEFAULT_SESSION)
    }

    pub fn projects_dir(&self) -> Result<PathBuf> {
        match &self.projects_dir {
            Some(dir) => Ok(expand_tilde(dir)),
            None => Ok(Self::loom_dir()?.join("projects")),
        }
    }

    pub fn state_dir(&self) -> Result<PathBuf> {
        match &self.state_dir {
            Some(dir) => Ok(expand_tilde(dir)),
            None => Ok(Self::loom_dir()?.join("state")),
        }
    }

    pub fn project_path(&self, name: &str) -> Result<PathBuf> {
        Ok(self.projects_dir()?.join(format!("{}.toml", name)))
    }

    pub fn lifecycle(&self) -> LifecycleSettings {
        let defaults = LifecycleSettings::default();
        LifecycleSettings {
            attach_timeout: self
                .attach_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.attach_timeout),
            hook_timeout: self
                .hook_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.hook_timeout),
            grace_period: self
                .grace_period_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.grace_period),
            poll_interval: self
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.poll_interval),
        }
    }

    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Config::load");
        if !path.exists() {
            debug!("Config file not found, using defaults");
            return Ok(Self::default());
        }
        let config: Self = toml::from_str(&fs::read_to_string(path)?)?;
        debug!(
            session = config.effective_session(),
            projects_dir = ?config.projects_dir,
            state_dir = ?config.state_dir,
            "Config loaded"
        );
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let loom_dir = Self::loom_dir()?;
        if !loom_dir.exists() {
            debug!(dir = %loom_dir.display(), "Creating loom directory");
            fs::create_dir_all(&loom_dir)?;
        }
        let path = Self::config_path()?;
        fs::write(&path, toml::to_string_pretty(self)?)?;
        debug!(path = %path.display(), "Config saved");
        Ok(())
    }

    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.projects_dir()?, self.state_dir()?] {
            if !dir.exists() {
                debug!(dir = %dir.display(), "Creating directory");
                fs::create_dir_all(&dir)?;
            }
        }
        Ok(())
    }
}

pub fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

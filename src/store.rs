//! Persisted project state.
//!
//! One JSON document per project under the state directory. Writers of a
//! project hold an exclusive lock on `<name>.lock` for the whole
//! read-modify-write; documents are replaced by rename so readers never see
//! a partial write.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::host::{EntityId, SpawnToken};
use crate::report::{LifecycleState, Outcome, ResourceOutcome, Warning};
use crate::tag::{Placement, Tag};
use crate::{Error, Result};

pub const STATE_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl ProjectStatus {
    /// Whether a start must be refused.
    pub fn is_active(&self) -> bool {
        !matches!(self, ProjectStatus::Stopped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceStatus {
    Pending,
    Live,
    Stopped,
    Orphaned,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedResource {
    pub project_name: String,
    pub resource_id: String,
    /// Unknown until the entity has been correlated.
    #[serde(default)]
    pub host_entity_id: Option<EntityId>,
    pub tag: Tag,
    pub status: ResourceStatus,
    #[serde(default)]
    pub pid: Option<u32>,
    #[serde(default)]
    pub spawn_token: Option<SpawnToken>,
    #[serde(default)]
    pub placement: Placement,
    #[serde(default)]
    pub interactive: bool,
    /// Bound to an entity that existed before the start.
    #[serde(default)]
    pub reused: bool,
}

impl TrackedResource {
    pub fn is_live(&self) -> bool {
        self.status == ResourceStatus::Live
    }

    pub fn outcome(&self) -> Outcome {
        match (self.status, &self.host_entity_id) {
            (ResourceStatus::Live, Some(entity)) => Outcome::Live {
                tag: self.tag.clone(),
                entity: entity.clone(),
                reused: self.reused,
            },
            (ResourceStatus::Live, None) | (ResourceStatus::Pending, _) => Outcome::Pending,
            (ResourceStatus::Stopped, _) => Outcome::Stopped { forced: false },
            (ResourceStatus::Orphaned, _) => Outcome::Orphaned,
        }
    }
}

/// A resource that could not be brought up, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceFailure {
    pub resource_id: String,
    pub reason: String,
}

/// A start or stop hook that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HookFailure {
    pub hook: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectState {
    #[serde(default = "default_version")]
    pub version: u32,
    pub project_name: String,
    pub base_tag: u8,
    pub status: ProjectStatus,
    #[serde(default)]
    pub resources: Vec<TrackedResource>,
    #[serde(default)]
    pub failures: Vec<ResourceFailure>,
    #[serde(default)]
    pub hook_failures: Vec<HookFailure>,
    #[serde(default)]
    pub stop_hook: Option<String>,
    #[serde(default)]
    pub workdir: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_version() -> u32 {
    STATE_VERSION
}

impl ProjectState {
    pub fn starting(project_name: impl Into<String>, base_tag: u8) -> Self {
        let now = Utc::now();
        Self {
            version: STATE_VERSION,
            project_name: project_name.into(),
            base_tag,
            status: ProjectStatus::Starting,
            resources: Vec::new(),
            failures: Vec::new(),
            hook_failures: Vec::new(),
            stop_hook: None,
            workdir: None,
            started_at: now,
            updated_at: now,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn resource(&self, resource_id: &str) -> Option<&TrackedResource> {
        self.resources.iter().find(|r| r.resource_id == resource_id)
    }

    /// Insert or replace the record for `tracked.resource_id`, keeping one
    /// record per resource.
    pub fn upsert_resource(&mut self, tracked: TrackedResource) {
        match self
            .resources
            .iter_mut()
            .find(|r| r.resource_id == tracked.resource_id)
        {
            Some(existing) => *existing = tracked,
            None => self.resources.push(tracked),
        }
    }

    pub fn record_failure(&mut self, resource_id: impl Into<String>, reason: impl Into<String>) {
        let resource_id = resource_id.into();
        self.failures.retain(|f| f.resource_id != resource_id);
        self.failures.push(ResourceFailure {
            resource_id,
            reason: reason.into(),
        });
    }

    pub fn record_hook_failure(&mut self, hook: impl Into<String>, reason: impl Into<String>) {
        let hook = hook.into();
        self.hook_failures.retain(|f| f.hook != hook);
        self.hook_failures.push(HookFailure {
            hook,
            reason: reason.into(),
        });
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty() || !self.hook_failures.is_empty()
    }

    pub fn live_count(&self) -> usize {
        self.resources.iter().filter(|r| r.is_live()).count()
    }

    /// Stopped with nothing live left.
    pub fn is_removable(&self) -> bool {
        self.status == ProjectStatus::Stopped && self.live_count() == 0
    }

    pub fn lifecycle(&self) -> LifecycleState {
        match self.status {
            ProjectStatus::Starting => LifecycleState::Starting,
            ProjectStatus::Running if !self.has_failures() => LifecycleState::Running,
            ProjectStatus::Running => LifecycleState::PartiallyFailed,
            ProjectStatus::Stopping => LifecycleState::Stopping,
            ProjectStatus::Stopped => LifecycleState::Stopped,
        }
    }

    /// Per-resource outcomes: tracked resources in stored order, then
    /// failures that never produced a record.
    pub fn outcomes(&self) -> Vec<ResourceOutcome> {
        let mut outcomes: Vec<ResourceOutcome> = self
            .resources
            .iter()
            .map(|r| match self.failures.iter().find(|f| f.resource_id == r.resource_id) {
                Some(failure) if !r.is_live() => {
                    ResourceOutcome::failed(&r.resource_id, &failure.reason)
                }
                _ => ResourceOutcome::new(&r.resource_id, r.outcome()),
            })
            .collect();
        for failure in &self.failures {
            if self.resource(&failure.resource_id).is_none() {
                outcomes.push(ResourceOutcome::failed(
                    &failure.resource_id,
                    &failure.reason,
                ));
            }
        }
        outcomes
    }
}

/// File-backed store of [`ProjectState`] documents.
#[derive(Debug)]
pub struct StateStore {
    dir: PathBuf,
    warnings: Mutex<Vec<Warning>>,
}

impl StateStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            warnings: Mutex::new(Vec::new()),
        }
    }

    pub fn state_path(&self, project: &str) -> PathBuf {
        self.dir.join(format!("{}.json", project))
    }

    fn lock_path(&self, project: &str) -> PathBuf {
        self.dir.join(format!("{}.lock", project))
    }

    /// Corruption warnings queued since the last call.
    pub fn take_warnings(&self) -> Vec<Warning> {
        match self.warnings.lock() {
            Ok(mut warnings) => std::mem::take(&mut *warnings),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        }
    }

    fn push_warning(&self, warning: Warning) {
        match self.warnings.lock() {
            Ok(mut warnings) => warnings.push(warning),
            Err(poisoned) => poisoned.into_inner().push(warning),
        }
    }

    /// Every readable project document, keyed by project name.
    pub fn load(&self) -> Result<BTreeMap<String, ProjectState>> {
        let mut states = BTreeMap::new();
        if !self.dir.exists() {
            return Ok(states);
        }
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if let Some(state) = self.read(name, false)? {
                states.insert(name.to_string(), state);
            }
        }
        debug!(count = states.len(), dir = %self.dir.display(), "loaded project states");
        Ok(states)
    }

    pub fn get(&self, project: &str) -> Result<Option<ProjectState>> {
        self.read(project, false)
    }

    /// Atomic read-modify-write of one project's document.
    ///
    /// `mutate` sees `None` when no document exists; leaving `None` behind
    /// deletes it. When `mutate` fails nothing is written.
    pub fn commit<T, F>(&self, project: &str, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut Option<ProjectState>) -> Result<T>,
    {
        let _lock = self.acquire_lock(project)?;

        let mut state = self.read(project, true)?;
        let before = state.clone();
        let value = mutate(&mut state)?;

        if state != before {
            let written = match &mut state {
                Some(state) => {
                    state.touch();
                    self.write(project, state)
                }
                None => self.delete(project),
            };
            written.map_err(|e| Error::StoreWrite {
                project: project.to_string(),
                reason: e.to_string(),
            })?;
        }
        Ok(value)
    }

    /// Delete a project's document. Returns whether one existed.
    pub fn remove(&self, project: &str) -> Result<bool> {
        let _lock = self.acquire_lock(project)?;
        let existed = self.state_path(project).exists();
        self.delete(project).map_err(|e| Error::StoreWrite {
            project: project.to_string(),
            reason: e.to_string(),
        })?;
        Ok(existed)
    }

    fn acquire_lock(&self, project: &str) -> Result<File> {
        fs::create_dir_all(&self.dir)?;
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path(project))?;
        lock_file.lock_exclusive()?;
        Ok(lock_file)
    }

    /// Read one document. Malformed documents read as absent with a queued
    /// warning; under the lock they are also moved aside.
    fn read(&self, project: &str, locked: bool) -> Result<Option<ProjectState>> {
        let path = self.state_path(project);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<ProjectState>(&contents) {
            Ok(state) => Ok(Some(state)),
            Err(e) => {
                warn!(project, error = %e, "state document is corrupt");
                if locked {
                    let quarantine = path.with_extension("json.corrupt");
                    if let Err(rename_err) = fs::rename(&path, &quarantine) {
                        warn!(project, error = %rename_err, "could not move corrupt state aside");
                    }
                }
                self.push_warning(Warning::StoreCorruption {
                    project: project.to_string(),
                    reason: e.to_string(),
                });
                Ok(None)
            }
        }
    }

    fn write(&self, project: &str, state: &ProjectState) -> Result<()> {
        let path = self.state_path(project);
        let contents = serde_json::to_string_pretty(state)?;

        if path.exists() {
            fs::copy(&path, path.with_extension("json.bak"))?;
        }

        let temp_path = path.with_extension("json.tmp");
        let mut file = File::create(&temp_path)?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        fs::rename(&temp_path, &path)?;
        File::open(&self.dir)?.sync_all()?;
        debug!(project, status = ?state.status, "state committed");
        Ok(())
    }

    fn delete(&self, project: &str) -> Result<()> {
        let path = self.state_path(project);
        match fs::remove_file(&path) {
            Ok(()) => {
                debug!(project, "state removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

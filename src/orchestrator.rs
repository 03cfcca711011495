//! Project lifecycle.
//!
//! Drives a project through `absent -> starting -> running -> stopping ->
//! stopped`. Per-resource failures are collected into the returned
//! [`OperationSummary`]; only malformed input, a busy or already running
//! project, and a failed final state commit abort a command.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use futures::future::join_all;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Config, LifecycleSettings};
use crate::hooks::{run_hook, HookKind};
use crate::host::{
    owner_key, EntityFilter, EntityId, Host, NotifyLevel, ShutdownSignal, TmuxHost,
    OWNER_PROPERTY, SPAWN_PROPERTY,
};
use crate::model::{ProjectSpec, ResourceSpec, ReusePolicy};
use crate::report::{
    LifecycleState, Operation, OperationSummary, Outcome, ResourceOutcome, Warning,
};
use crate::spawner::{HostInventory, Spawner};
use crate::store::{
    HookFailure, ProjectState, ProjectStatus, ResourceFailure, ResourceStatus, StateStore,
    TrackedResource,
};
use crate::tag::{resolve, Placement, ResolvedPlacement, Tag, TAG_MIN};
use crate::tracker::{Attachment, ClientTracker};
use crate::util::blocking;
use crate::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct StartOptions {
    /// Alternate layout to take placements from.
    pub layout: Option<String>,
}

/// What happened to one resource during a start.
struct Launch {
    /// `None` when the resource was skipped because of cancellation.
    result: Option<Result<Attachment>>,
    warnings: Vec<Warning>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Teardown {
    /// Nothing of ours was running.
    Gone,
    Graceful,
    Forced,
}

pub struct Orchestrator {
    host: Arc<dyn Host>,
    store: Arc<StateStore>,
    settings: LifecycleSettings,
    spawner: Spawner,
    tracker: ClientTracker,
    active: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl Orchestrator {
    pub fn new(host: Arc<dyn Host>, store: StateStore, settings: LifecycleSettings) -> Self {
        Self {
            spawner: Spawner::new(Arc::clone(&host), settings.attach_timeout),
            tracker: ClientTracker::new(
                Arc::clone(&host),
                settings.attach_timeout,
                settings.poll_interval,
            ),
            host,
            store: Arc::new(store),
            settings,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Orchestrator over the configured tmux session and state directory.
    pub fn from_config(config: &Config) -> Result<Self> {
        let host = TmuxHost::new(config.effective_session());
        let store = StateStore::new(config.state_dir()?);
        Ok(Self::new(Arc::new(host), store, config.lifecycle()))
    }

    pub async fn start(&self, spec: &ProjectSpec, layout: Option<&str>) -> Result<OperationSummary> {
        let options = StartOptions {
            layout: layout.map(String::from),
        };
        self.start_with(spec, &options, CancellationToken::new())
            .await
    }

    /// Start `spec`. Cancelling `cancel` skips resources not yet launched,
    /// lets launched ones finish, then stops the project.
    pub async fn start_with(
        &self,
        spec: &ProjectSpec,
        options: &StartOptions,
        cancel: CancellationToken,
    ) -> Result<OperationSummary> {
        spec.validate()?;
        let placements = spec.placements(options.layout.as_deref())?;
        let _guard = self.lock_project(&spec.name)?;
        let name = spec.name.clone();
        info!(project = %name, layout = ?options.layout, "starting project");

        let mut summary = OperationSummary::new(&name, Operation::Start, LifecycleState::Starting);

        let base_tag = match self.host_call(|host| host.get_current_tag()).await? {
            Tag::Numeric(n) => n,
            Tag::Named(tag) => {
                summary.warnings.push(Warning::NamedBaseTag { tag });
                TAG_MIN
            }
        };
        debug!(project = %name, base_tag, "base tag");

        let project = name.clone();
        let stop_hook = spec.hooks.stop.clone();
        let workdir = spec.project_workdir();
        self.commit(&name, move |state| {
            if let Some(existing) = state {
                if existing.status.is_active() || existing.live_count() > 0 {
                    return Err(Error::AlreadyRunning(project));
                }
            }
            let mut fresh = ProjectState::starting(&project, base_tag);
            fresh.stop_hook = stop_hook;
            fresh.workdir = workdir;
            *state = Some(fresh);
            Ok(())
        })
        .await?;
        summary.warnings.extend(self.store.take_warnings());

        let mut hook_failures = Vec::new();
        if let Some(hook) = &spec.hooks.start {
            if !cancel.is_cancelled() {
                let workdir = spec.project_workdir();
                if let Err(e) = run_hook(
                    HookKind::Start,
                    hook,
                    &name,
                    workdir.as_deref(),
                    self.settings.hook_timeout,
                    self.settings.grace_period,
                )
                .await
                {
                    let warning = hook_warning(HookKind::Start, e);
                    if let Warning::HookFailure { hook, reason } = &warning {
                        hook_failures.push(HookFailure {
                            hook: hook.clone(),
                            reason: reason.clone(),
                        });
                    }
                    summary.warnings.push(warning);
                }
            }
        }

        let resolved: Vec<ResolvedPlacement> =
            placements.iter().map(|p| resolve(p, base_tag)).collect();
        for (resource, r) in spec.resources.iter().zip(&resolved) {
            if r.overflowed {
                warn!(resource = %resource.id, requested = ?r.requested, tag = %r.tag, "placement clamped");
                summary.warnings.push(Warning::PlacementOverflow {
                    resource: resource.id.clone(),
                    requested: r.requested.unwrap_or_default(),
                    tag: r.tag.clone(),
                });
            }
        }

        let inventory = self.reuse_inventory(spec).await;
        let launches = join_all(
            spec.resources
                .iter()
                .zip(&placements)
                .zip(&resolved)
                .map(|((resource, placement), resolved)| {
                    self.launch(spec, resource, placement, resolved, &inventory, &cancel)
                }),
        )
        .await;

        let mut records: Vec<(String, Option<TrackedResource>)> = Vec::new();
        let mut failures = Vec::new();
        for (resource, launch) in spec.resources.iter().zip(launches) {
            summary.warnings.extend(launch.warnings);
            match launch.result {
                Some(Ok(attachment)) => {
                    let tracked = attachment.tracked;
                    summary.resources.push(ResourceOutcome::new(
                        &resource.id,
                        tracked.outcome(),
                    ));
                    records.push((resource.id.clone(), Some(tracked)));
                }
                Some(Err(e)) => {
                    let reason = failure_reason(&e);
                    warn!(project = %name, resource = %resource.id, %reason, "resource failed");
                    summary
                        .resources
                        .push(ResourceOutcome::failed(&resource.id, &reason));
                    failures.push(ResourceFailure {
                        resource_id: resource.id.clone(),
                        reason,
                    });
                    records.push((resource.id.clone(), None));
                }
                None => {
                    summary
                        .resources
                        .push(ResourceOutcome::failed(&resource.id, "start cancelled"));
                    records.push((resource.id.clone(), None));
                }
            }
        }

        let project = name.clone();
        let state = self
            .commit(&name, move |state| {
                let s = state.get_or_insert_with(|| ProjectState::starting(&project, base_tag));
                let mut ordered = Vec::with_capacity(records.len());
                for (id, record) in records {
                    match record {
                        Some(tracked) => ordered.push(tracked),
                        None => {
                            if let Some(existing) = s.resource(&id) {
                                ordered.push(existing.clone());
                            }
                        }
                    }
                }
                s.resources = ordered;
                s.failures = failures;
                s.hook_failures = hook_failures;
                s.status = ProjectStatus::Running;
                Ok(s.clone())
            })
            .await?;
        summary.status = state.lifecycle();

        if cancel.is_cancelled() {
            info!(project = %name, "start cancelled, tearing down");
            summary.warnings.push(Warning::Cancelled);
            let teardown = self.teardown(&name).await?;
            for outcome in summary.resources.iter_mut() {
                if outcome.is_failure() {
                    continue;
                }
                if let Some(stopped) = teardown.outcome(&outcome.resource_id) {
                    outcome.outcome = stopped.clone();
                }
            }
            summary.warnings.extend(teardown.warnings);
            summary.status = teardown.status;
        }

        info!(
            project = %name,
            status = %summary.status,
            ok = summary.succeeded(),
            failed = summary.failed(),
            "start finished"
        );
        self.announce(&summary).await;
        Ok(summary)
    }

    pub async fn stop(&self, name: &str) -> Result<OperationSummary> {
        let _guard = self.lock_project(name)?;
        info!(project = %name, "stopping project");
        let summary = self.teardown(name).await?;
        info!(
            project = %name,
            failed = summary.failed(),
            warnings = summary.warnings.len(),
            "stop finished"
        );
        self.announce(&summary).await;
        Ok(summary)
    }

    /// Read-only projection of the persisted state.
    pub async fn status(&self, name: &str) -> Result<OperationSummary> {
        let store = Arc::clone(&self.store);
        let project = name.to_string();
        let state = blocking(move || store.get(&project)).await?;
        let mut summary = project_summary(name, Operation::Status, state.as_ref());
        summary.warnings.extend(self.store.take_warnings());
        Ok(summary)
    }

    /// Status of every persisted project.
    pub async fn status_all(&self) -> Result<Vec<OperationSummary>> {
        let store = Arc::clone(&self.store);
        let states = blocking(move || store.load()).await?;
        let mut summaries: Vec<OperationSummary> = states
            .iter()
            .map(|(name, state)| project_summary(name, Operation::Status, Some(state)))
            .collect();
        let warnings = self.store.take_warnings();
        if let Some(first) = summaries.first_mut() {
            first.warnings.extend(warnings);
        }
        Ok(summaries)
    }

    /// Rebuild a project's live set from persisted state and the host.
    ///
    /// Entities are found by their owner property; tracked resources with
    /// nothing on the host become orphaned. Running it twice without host
    /// changes yields the same classification.
    pub async fn resume(&self, name: &str) -> Result<OperationSummary> {
        let _guard = self.lock_project(name)?;
        let store = Arc::clone(&self.store);
        let project = name.to_string();
        let state = blocking(move || store.get(&project))
            .await?
            .ok_or_else(|| Error::NotRunning(name.to_string()))?;
        if !has_running_resources(&state) && state.status == ProjectStatus::Stopped {
            return Err(Error::NotRunning(name.to_string()));
        }
        info!(project = %name, resources = state.resources.len(), "resuming project");

        let mut summary = OperationSummary::new(name, Operation::Resume, state.lifecycle());
        summary.warnings.extend(self.store.take_warnings());

        let entities = self
            .host_call(|host| host.list_entities(&EntityFilter::all()))
            .await?;
        let inventory = HostInventory::new(entities);

        let mut records = Vec::with_capacity(state.resources.len());
        for tracked in &state.resources {
            if tracked.status == ResourceStatus::Stopped {
                summary
                    .resources
                    .push(ResourceOutcome::new(&tracked.resource_id, tracked.outcome()));
                records.push(tracked.clone());
                continue;
            }
            match self.tracker.reattach(tracked, &inventory).await {
                Ok(Some(mut live)) => {
                    live.tag = resolve(&live.placement, state.base_tag).tag;
                    if let Some(entity) = &live.host_entity_id {
                        if let Err(e) = self.tracker.place(entity, &live.tag).await {
                            summary.warnings.push(Warning::TagAssignment {
                                resource: live.resource_id.clone(),
                                reason: e.to_string(),
                            });
                        }
                    }
                    summary
                        .resources
                        .push(ResourceOutcome::new(&live.resource_id, live.outcome()));
                    records.push(live);
                }
                Ok(None) => {
                    warn!(project = %name, resource = %tracked.resource_id, "resource orphaned");
                    summary.warnings.push(Warning::Orphaned {
                        resource: tracked.resource_id.clone(),
                    });
                    summary
                        .resources
                        .push(ResourceOutcome::new(&tracked.resource_id, Outcome::Orphaned));
                    records.push(TrackedResource {
                        status: ResourceStatus::Orphaned,
                        pid: None,
                        ..tracked.clone()
                    });
                }
                Err(e) => {
                    summary
                        .resources
                        .push(ResourceOutcome::failed(&tracked.resource_id, e.to_string()));
                    records.push(tracked.clone());
                }
            }
        }

        for failure in &state.failures {
            if state.resource(&failure.resource_id).is_none() {
                summary.resources.push(ResourceOutcome::failed(
                    &failure.resource_id,
                    &failure.reason,
                ));
            }
        }

        for stray in inventory.unclaimed_for_project(name) {
            warn!(project = %name, entity = %stray.id, "untracked entity claims project");
            summary.warnings.push(Warning::UntrackedEntity {
                entity: stray.id,
                owner: stray.owner.unwrap_or_default(),
            });
        }

        let project = name.to_string();
        let base_tag = state.base_tag;
        let resumed = self
            .commit(name, move |state| {
                let s = state.get_or_insert_with(|| ProjectState::starting(&project, base_tag));
                let live: BTreeSet<String> = records
                    .iter()
                    .filter(|r| r.is_live())
                    .map(|r| r.resource_id.clone())
                    .collect();
                s.failures.retain(|f| !live.contains(&f.resource_id));
                s.resources = records;
                s.status = ProjectStatus::Running;
                Ok(s.clone())
            })
            .await?;
        summary.status = resumed.lifecycle();

        info!(project = %name, status = %summary.status, "resume finished");
        Ok(summary)
    }

    /// Resume every persisted project that is not stopped.
    pub async fn resume_all(&self) -> Result<Vec<(String, Result<OperationSummary>)>> {
        let store = Arc::clone(&self.store);
        let states = blocking(move || store.load()).await?;
        let mut results = Vec::new();
        for (name, state) in states {
            if state.status == ProjectStatus::Stopped && !has_running_resources(&state) {
                continue;
            }
            let result = self.resume(&name).await;
            results.push((name, result));
        }
        Ok(results)
    }

    fn lock_project(&self, name: &str) -> Result<OwnedMutexGuard<()>> {
        let lock = {
            let mut active = match self.active.lock() {
                Ok(active) => active,
                Err(poisoned) => poisoned.into_inner(),
            };
            Arc::clone(active.entry(name.to_string()).or_default())
        };
        lock.try_lock_owned()
            .map_err(|_| Error::ProjectBusy(name.to_string()))
    }

    async fn host_call<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&dyn Host) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let host = Arc::clone(&self.host);
        blocking(move || f(host.as_ref())).await
    }

    async fn commit<T, F>(&self, project: &str, mutate: F) -> Result<T>
    where
        F: FnOnce(&mut Option<ProjectState>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let project = project.to_string();
        blocking(move || store.commit(&project, mutate)).await
    }

    async fn save_resource(&self, tracked: TrackedResource) -> Result<()> {
        let project = tracked.project_name.clone();
        self.commit(&project, move |state| {
            if let Some(s) = state {
                s.upsert_resource(tracked);
            }
            Ok(())
        })
        .await
    }

    /// Host snapshot for reuse matching; empty when nothing reuses.
    async fn reuse_inventory(&self, spec: &ProjectSpec) -> HostInventory {
        let reuses = spec
            .resources
            .iter()
            .any(|r| matches!(r.reuse, ReusePolicy::ReuseIfMatch(_)));
        if !reuses {
            return HostInventory::default();
        }
        match self
            .host_call(|host| host.list_entities(&EntityFilter::all()))
            .await
        {
            Ok(entities) => HostInventory::new(entities),
            Err(e) => {
                warn!(project = %spec.name, error = %e, "host inventory unavailable, spawning fresh");
                HostInventory::default()
            }
        }
    }

    async fn launch(
        &self,
        spec: &ProjectSpec,
        resource: &ResourceSpec,
        placement: &Placement,
        resolved: &ResolvedPlacement,
        inventory: &HostInventory,
        cancel: &CancellationToken,
    ) -> Launch {
        let mut warnings = Vec::new();
        if cancel.is_cancelled() {
            debug!(resource = %resource.id, "skipping resource, start cancelled");
            return Launch {
                result: None,
                warnings,
            };
        }

        let handle = match self
            .spawner
            .acquire(spec, resource, placement, resolved, inventory)
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                return Launch {
                    result: Some(Err(e)),
                    warnings,
                }
            }
        };

        if let Some(token) = handle.spawn_token() {
            let pending = TrackedResource {
                project_name: handle.project.clone(),
                resource_id: handle.resource_id.clone(),
                host_entity_id: None,
                tag: handle.tag.clone(),
                status: ResourceStatus::Pending,
                pid: None,
                spawn_token: Some(token.clone()),
                placement: handle.placement.clone(),
                interactive: handle.interactive,
                reused: false,
            };
            if let Err(e) = self.save_resource(pending).await {
                warnings.push(Warning::StateCommit {
                    resource: resource.id.clone(),
                    reason: e.to_string(),
                });
            }
        }

        let result = self.tracker.attach(handle).await;
        if let Ok(attachment) = &result {
            if let Err(e) = self.save_resource(attachment.tracked.clone()).await {
                warnings.push(Warning::StateCommit {
                    resource: resource.id.clone(),
                    reason: e.to_string(),
                });
            }
            warnings.extend(attachment.warning.clone());
        }
        Launch {
            result: Some(result),
            warnings,
        }
    }

    /// Stop without taking the project lock or notifying the host.
    async fn teardown(&self, name: &str) -> Result<OperationSummary> {
        let project = name.to_string();
        let state = self
            .commit(name, move |state| match state {
                Some(s) if s.status != ProjectStatus::Stopped || has_running_resources(s) => {
                    s.status = ProjectStatus::Stopping;
                    Ok(s.clone())
                }
                _ => Err(Error::NotRunning(project)),
            })
            .await?;

        let mut summary = OperationSummary::new(name, Operation::Stop, LifecycleState::Stopping);
        summary.warnings.extend(self.store.take_warnings());
        let mut clean = true;
        let mut stop_hook_failure = None;

        if let Some(hook) = &state.stop_hook {
            if let Err(e) = run_hook(
                HookKind::Stop,
                hook,
                name,
                state.workdir.as_deref(),
                self.settings.hook_timeout,
                self.settings.grace_period,
            )
            .await
            {
                clean = false;
                let warning = hook_warning(HookKind::Stop, e);
                if let Warning::HookFailure { hook, reason } = &warning {
                    stop_hook_failure = Some(HookFailure {
                        hook: hook.clone(),
                        reason: reason.clone(),
                    });
                }
                summary.warnings.push(warning);
            }
        }

        let results = join_all(state.resources.iter().map(|r| self.teardown_resource(r))).await;

        let mut records = Vec::with_capacity(state.resources.len());
        let mut failures = Vec::new();
        for (tracked, result) in state.resources.iter().zip(results) {
            match result {
                Ok(teardown) => {
                    let forced = teardown == Teardown::Forced;
                    if forced {
                        summary.warnings.push(Warning::ForceKilled {
                            resource: tracked.resource_id.clone(),
                        });
                    }
                    summary.resources.push(ResourceOutcome::new(
                        &tracked.resource_id,
                        Outcome::Stopped { forced },
                    ));
                    records.push(TrackedResource {
                        status: ResourceStatus::Stopped,
                        ..tracked.clone()
                    });
                }
                Err(e) => {
                    let reason = e.to_string();
                    warn!(project = %name, resource = %tracked.resource_id, %reason, "teardown failed");
                    summary
                        .resources
                        .push(ResourceOutcome::failed(&tracked.resource_id, &reason));
                    failures.push(ResourceFailure {
                        resource_id: tracked.resource_id.clone(),
                        reason,
                    });
                    records.push(tracked.clone());
                }
            }
        }

        if failures.is_empty() {
            let named: BTreeSet<Tag> = state
                .resources
                .iter()
                .filter(|r| r.tag.is_named())
                .map(|r| r.tag.clone())
                .collect();
            for tag in named {
                let target = tag.clone();
                if let Err(e) = self.host_call(move |host| host.close_tag(&target)).await {
                    summary.warnings.push(Warning::TagClose {
                        tag,
                        reason: e.to_string(),
                    });
                }
            }
        } else {
            clean = false;
        }

        self.commit(name, move |state| {
            if clean {
                *state = None;
            } else if let Some(s) = state {
                s.resources = records;
                s.failures = failures;
                if let Some(failure) = stop_hook_failure {
                    s.record_hook_failure(failure.hook, failure.reason);
                }
                s.status = ProjectStatus::Stopped;
            }
            Ok(())
        })
        .await?;

        summary.status = LifecycleState::Stopped;
        Ok(summary)
    }

    async fn teardown_resource(&self, tracked: &TrackedResource) -> Result<Teardown> {
        let entity = match tracked.status {
            ResourceStatus::Live => tracked.host_entity_id.clone(),
            ResourceStatus::Pending => match &tracked.spawn_token {
                Some(token) => {
                    let filter = EntityFilter::spawn_token(token);
                    self.host_call(move |host| host.list_entities(&filter))
                        .await?
                        .into_iter()
                        .next()
                        .map(|e| e.id)
                }
                None => None,
            },
            ResourceStatus::Stopped | ResourceStatus::Orphaned => None,
        };
        let Some(entity) = entity else {
            return Ok(Teardown::Gone);
        };

        if !self.still_ours(&entity, tracked).await? {
            debug!(resource = %tracked.resource_id, %entity, "entity gone or no longer ours");
            return Ok(Teardown::Gone);
        }

        let signal = if tracked.interactive {
            ShutdownSignal::Interrupt
        } else {
            ShutdownSignal::Terminate
        };
        debug!(resource = %tracked.resource_id, %entity, %signal, "signalling");
        let target = entity.clone();
        self.host_call(move |host| host.signal_entity(&target, signal))
            .await?;
        if self.wait_for_exit(&entity).await? {
            return Ok(Teardown::Graceful);
        }

        warn!(resource = %tracked.resource_id, %entity, "grace period elapsed, killing");
        let target = entity.clone();
        self.host_call(move |host| host.signal_entity(&target, ShutdownSignal::Kill))
            .await?;
        Ok(Teardown::Forced)
    }

    /// Whether `entity` is alive and still carries this resource's identity.
    async fn still_ours(&self, entity: &EntityId, tracked: &TrackedResource) -> Result<bool> {
        let entity = entity.clone();
        let owner = owner_key(&tracked.project_name, &tracked.resource_id);
        let token = tracked.spawn_token.as_ref().map(|t| t.as_str().to_string());
        self.host_call(move |host| {
            if !host.entity_alive(&entity)? {
                return Ok(false);
            }
            match host.get_entity_property(&entity, OWNER_PROPERTY)? {
                Some(value) => Ok(value == owner),
                None => Ok(token.is_some()
                    && host.get_entity_property(&entity, SPAWN_PROPERTY)? == token),
            }
        })
        .await
    }

    /// Poll until `entity` exits or the grace period runs out.
    async fn wait_for_exit(&self, entity: &EntityId) -> Result<bool> {
        let deadline = Instant::now() + self.settings.grace_period;
        loop {
            let target = entity.clone();
            if !self.host_call(move |host| host.entity_alive(&target)).await? {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            sleep(self.settings.poll_interval).await;
        }
    }

    async fn announce(&self, summary: &OperationSummary) {
        let level = if summary.failed() > 0 && summary.succeeded() == 0 {
            NotifyLevel::Error
        } else if summary.is_clean() {
            NotifyLevel::Info
        } else {
            NotifyLevel::Warning
        };
        let message = summary.headline();
        if let Err(e) = self.host_call(move |host| host.notify(&message, level)).await {
            warn!(project = %summary.project, error = %e, "notify failed");
        }
    }
}

fn has_running_resources(state: &ProjectState) -> bool {
    state
        .resources
        .iter()
        .any(|r| matches!(r.status, ResourceStatus::Live | ResourceStatus::Pending))
}

fn project_summary(name: &str, operation: Operation, state: Option<&ProjectState>) -> OperationSummary {
    match state {
        Some(state) => {
            let mut summary = OperationSummary::new(name, operation, state.lifecycle());
            summary.resources = state.outcomes();
            summary.warnings = state
                .hook_failures
                .iter()
                .map(|f| Warning::HookFailure {
                    hook: f.hook.clone(),
                    reason: f.reason.clone(),
                })
                .collect();
            summary
        }
        None => OperationSummary::new(name, operation, LifecycleState::Absent),
    }
}

fn hook_warning(kind: HookKind, error: Error) -> Warning {
    match error {
        Error::HookFailure { hook, reason } => Warning::HookFailure { hook, reason },
        other => Warning::HookFailure {
            hook: kind.as_str().to_string(),
            reason: other.to_string(),
        },
    }
}

/// Failure text for a summary entry, without the resource id prefix.
fn failure_reason(error: &Error) -> String {
    match error {
        Error::SpawnFailure { reason, .. } => reason.clone(),
        Error::AttachTimeout { timeout, .. } => format!("did not appear within {:?}", timeout),
        other => other.to_string(),
    }
}

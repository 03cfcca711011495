//! Resource acquisition.
//!
//! Binds a resource to an existing host entity when its reuse policy
//! matches, otherwise issues exactly one spawn request. Failures carry the
//! resource id and never affect sibling resources.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tracing::{debug, info};

use crate::host::{
    owner_key, EntityId, Host, HostEntity, SpawnRequest, SpawnToken, PROJECT_ENV, RESOURCE_ENV,
    SPAWN_TOKEN_ENV,
};
use crate::model::{ProjectSpec, ReusePolicy, ResourceSpec};
use crate::tag::{Placement, ResolvedPlacement, Tag};
use crate::util::blocking_with_timeout;
use crate::{Error, Result};

/// Snapshot of host entities shared by all acquisitions of one command.
///
/// An entity can be claimed once, so two resources never bind the same
/// entity.
#[derive(Debug, Default)]
pub struct HostInventory {
    entities: Vec<HostEntity>,
    claimed: Mutex<HashSet<EntityId>>,
}

impl HostInventory {
    pub fn new(entities: Vec<HostEntity>) -> Self {
        Self {
            entities,
            claimed: Mutex::new(HashSet::new()),
        }
    }

    pub fn is_claimed(&self, id: &EntityId) -> bool {
        match self.claimed.lock() {
            Ok(claimed) => claimed.contains(id),
            Err(poisoned) => poisoned.into_inner().contains(id),
        }
    }

    /// Claim the first unclaimed entity accepted by `accept`.
    pub fn claim_where<F>(&self, accept: F) -> Option<HostEntity>
    where
        F: Fn(&HostEntity) -> bool,
    {
        let mut claimed = match self.claimed.lock() {
            Ok(claimed) => claimed,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entity = self
            .entities
            .iter()
            .find(|e| !claimed.contains(&e.id) && accept(e))?;
        claimed.insert(entity.id.clone());
        Some(entity.clone())
    }

    /// Claim an entity for reuse by `project/resource`.
    ///
    /// Entities already owned by this resource win; unowned entities are
    /// next. Entities owned by anything else are never returned.
    pub fn claim_for_reuse<F>(&self, project: &str, resource: &str, accept: F) -> Option<HostEntity>
    where
        F: Fn(&HostEntity) -> bool,
    {
        let owner = owner_key(project, resource);
        self.claim_where(|e| e.owner.as_deref() == Some(owner.as_str()) && accept(e))
            .or_else(|| self.claim_where(|e| e.owner.is_none() && accept(e)))
    }

    /// Unclaimed entities whose owner names `project`.
    pub fn unclaimed_for_project(&self, project: &str) -> Vec<HostEntity> {
        self.entities
            .iter()
            .filter(|e| e.owner_project() == Some(project) && !self.is_claimed(&e.id))
            .cloned()
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Binding {
    /// Bound to an entity that already existed.
    Reused(HostEntity),
    /// Spawn issued; the entity carries this token once it appears.
    Spawned(SpawnToken),
}

/// A resource between acquisition and attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingHandle {
    pub project: String,
    pub resource_id: String,
    pub tag: Tag,
    pub placement: Placement,
    pub interactive: bool,
    pub binding: Binding,
}

impl PendingHandle {
    pub fn spawn_token(&self) -> Option<&SpawnToken> {
        match &self.binding {
            Binding::Spawned(token) => Some(token),
            Binding::Reused(_) => None,
        }
    }
}

pub struct Spawner {
    host: Arc<dyn Host>,
    /// Upper bound on the host's spawn call itself.
    spawn_timeout: Duration,
}

impl Spawner {
    pub fn new(host: Arc<dyn Host>, spawn_timeout: Duration) -> Self {
        Self {
            host,
            spawn_timeout,
        }
    }

    pub async fn acquire(
        &self,
        project: &ProjectSpec,
        resource: &ResourceSpec,
        placement: &Placement,
        resolved: &ResolvedPlacement,
        inventory: &HostInventory,
    ) -> Result<PendingHandle> {
        let workdir = project.workdir_for(resource);
        let handle = |binding: Binding| PendingHandle {
            project: project.name.clone(),
            resource_id: resource.id.clone(),
            tag: resolved.tag.clone(),
            placement: placement.clone(),
            interactive: resource.is_interactive(),
            binding,
        };

        if let ReusePolicy::ReuseIfMatch(predicate) = &resource.reuse {
            let found = inventory.claim_for_reuse(&project.name, &resource.id, |entity| {
                predicate.matches(resource, workdir.as_deref(), entity)
            });
            if let Some(entity) = found {
                info!(
                    project = %project.name,
                    resource = %resource.id,
                    entity = %entity.id,
                    "reusing existing entity"
                );
                return Ok(handle(Binding::Reused(entity)));
            }
            debug!(resource = %resource.id, "no reusable entity, spawning");
        }

        let request = build_request(&project.name, resource, workdir)?;
        let token = request.token.clone();
        debug!(
            resource = %resource.id,
            token = %token,
            argv = ?request.argv,
            "spawning resource"
        );

        let host = Arc::clone(&self.host);
        let resource_id = resource.id.clone();
        let spawned = blocking_with_timeout(self.spawn_timeout, move || host.spawn(&request)).await;
        match spawned {
            Ok(_) => Ok(handle(Binding::Spawned(token))),
            Err(Error::SpawnFailure { reason, .. }) | Err(Error::Host(reason)) => {
                Err(Error::SpawnFailure {
                    resource: resource_id,
                    reason,
                })
            }
            Err(e) => Err(Error::SpawnFailure {
                resource: resource_id,
                reason: e.to_string(),
            }),
        }
    }
}

/// Check the resource can be launched and describe the launch.
fn build_request(
    project: &str,
    resource: &ResourceSpec,
    workdir: Option<PathBuf>,
) -> Result<SpawnRequest> {
    let failure = |reason: String| Error::SpawnFailure {
        resource: resource.id.clone(),
        reason,
    };

    if let Some(dir) = &workdir {
        if !Path::new(dir).is_dir() {
            return Err(failure(format!(
                "working directory does not exist: {}",
                dir.display()
            )));
        }
    }

    // Relative commands resolve against the directory the resource runs in.
    let cwd = match &workdir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir()
            .map_err(|e| failure(format!("no working directory: {}", e)))?,
    };
    let program = resource.program();
    if which::which_in(program, std::env::var_os("PATH"), &cwd).is_err() {
        return Err(failure(format!("command not executable: {}", program)));
    }

    let token = SpawnToken::new(project, &resource.id);
    let mut env: Vec<(String, String)> = resource
        .env
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    env.push((PROJECT_ENV.to_string(), project.to_string()));
    env.push((RESOURCE_ENV.to_string(), resource.id.clone()));
    env.push((SPAWN_TOKEN_ENV.to_string(), token.as_str().to_string()));

    Ok(SpawnRequest {
        token,
        argv: resource.argv(),
        env,
        workdir,
    })
}

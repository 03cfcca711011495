//! Client tracking.
//!
//! Correlates host entities with pending handles through the spawn token,
//! then stamps the owner property on the entity so ownership can be
//! rediscovered from the host alone.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

use crate::host::{owner_key, EntityFilter, EntityId, Host, HostEntity, SpawnToken, OWNER_PROPERTY};
use crate::report::Warning;
use crate::spawner::{Binding, HostInventory, PendingHandle};
use crate::store::{ResourceStatus, TrackedResource};
use crate::tag::Tag;
use crate::util::blocking;
use crate::{Error, Result};

/// A resource that reached `live`, plus any non-fatal problem on the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    pub tracked: TrackedResource,
    pub warning: Option<Warning>,
}

pub struct ClientTracker {
    host: Arc<dyn Host>,
    attach_timeout: Duration,
    poll_interval: Duration,
}

impl ClientTracker {
    pub fn new(host: Arc<dyn Host>, attach_timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            host,
            attach_timeout,
            poll_interval,
        }
    }

    /// Wait for the handle's entity, claim it and move it to its tag.
    pub async fn attach(&self, handle: PendingHandle) -> Result<Attachment> {
        let (entity, reused) = match &handle.binding {
            Binding::Reused(entity) => (entity.clone(), true),
            Binding::Spawned(token) => (self.wait_for_entity(&handle, token).await?, false),
        };
        self.bind(handle, entity, reused).await
    }

    async fn wait_for_entity(&self, handle: &PendingHandle, token: &SpawnToken) -> Result<HostEntity> {
        let deadline = Instant::now() + self.attach_timeout;
        let filter = EntityFilter::spawn_token(token);
        loop {
            let host = Arc::clone(&self.host);
            let filter = filter.clone();
            let found = blocking(move || host.list_entities(&filter)).await?;
            if let Some(entity) = found.into_iter().next() {
                debug!(resource = %handle.resource_id, entity = %entity.id, "entity appeared");
                return Ok(entity);
            }
            if Instant::now() >= deadline {
                warn!(
                    resource = %handle.resource_id,
                    token = %token,
                    "entity did not appear in time"
                );
                return Err(Error::AttachTimeout {
                    resource: handle.resource_id.clone(),
                    timeout: self.attach_timeout,
                });
            }
            sleep(self.poll_interval).await;
        }
    }

    async fn bind(&self, handle: PendingHandle, entity: HostEntity, reused: bool) -> Result<Attachment> {
        let owner = owner_key(&handle.project, &handle.resource_id);
        let host = Arc::clone(&self.host);
        let id = entity.id.clone();
        blocking(move || host.set_entity_property(&id, OWNER_PROPERTY, &owner)).await?;

        let warning = self
            .place(&entity.id, &handle.tag)
            .await
            .err()
            .map(|e| Warning::TagAssignment {
                resource: handle.resource_id.clone(),
                reason: e.to_string(),
            });

        info!(
            project = %handle.project,
            resource = %handle.resource_id,
            entity = %entity.id,
            tag = %handle.tag,
            reused,
            "resource live"
        );

        let spawn_token = handle.spawn_token().cloned();
        Ok(Attachment {
            tracked: TrackedResource {
                project_name: handle.project,
                resource_id: handle.resource_id,
                host_entity_id: Some(entity.id),
                tag: handle.tag,
                status: ResourceStatus::Live,
                pid: entity.pid,
                spawn_token,
                placement: handle.placement,
                interactive: handle.interactive,
                reused,
            },
            warning,
        })
    }

    /// Assign `entity` to `tag`, creating the tag first when it is named.
    pub async fn place(&self, entity: &EntityId, tag: &Tag) -> Result<()> {
        let host = Arc::clone(&self.host);
        let entity = entity.clone();
        let tag = tag.clone();
        blocking(move || {
            let tag = match &tag {
                Tag::Named(name) => host.create_tag(name)?,
                Tag::Numeric(_) => tag,
            };
            host.assign_entity_to_tag(&entity, &tag)
        })
        .await
    }

    /// Rebuild a live record for `tracked` from the host inventory.
    ///
    /// Matches on the owner property first, preferring the recorded entity
    /// id, then on the spawn token for records that never attached. Returns
    /// `None` when nothing on the host belongs to the resource.
    pub async fn reattach(
        &self,
        tracked: &TrackedResource,
        inventory: &HostInventory,
    ) -> Result<Option<TrackedResource>> {
        let owner = owner_key(&tracked.project_name, &tracked.resource_id);
        let by_owner = |e: &HostEntity| e.owner.as_deref() == Some(owner.as_str());

        let found = inventory
            .claim_where(|e| Some(&e.id) == tracked.host_entity_id.as_ref() && by_owner(e))
            .or_else(|| inventory.claim_where(by_owner))
            .or_else(|| {
                let token = tracked.spawn_token.as_ref()?;
                inventory.claim_where(|e| {
                    e.owner.is_none() && e.spawn_token.as_deref() == Some(token.as_str())
                })
            });
        let Some(entity) = found else {
            return Ok(None);
        };

        if entity.owner.is_none() {
            let host = Arc::clone(&self.host);
            let id = entity.id.clone();
            let owner = owner.clone();
            blocking(move || host.set_entity_property(&id, OWNER_PROPERTY, &owner)).await?;
        }
        debug!(resource = %tracked.resource_id, entity = %entity.id, "reattached");

        Ok(Some(TrackedResource {
            host_entity_id: Some(entity.id),
            pid: entity.pid,
            status: ResourceStatus::Live,
            ..tracked.clone()
        }))
    }
}

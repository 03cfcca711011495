//! In-memory host.
//!
//! Keeps tags, entities and entity properties in process memory. Spawned
//! entities appear immediately unless their program was registered with
//! [`MemoryHost::hide_spawns`]. Scripted failures make the lifecycle paths
//! reachable without a real window manager.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use tracing::trace;

use super::{
    EntityFilter, EntityId, Host, HostEntity, NotifyLevel, ShutdownSignal, SpawnRequest,
    SpawnToken, OWNER_PROPERTY, SPAWN_PROPERTY,
};
use crate::tag::Tag;
use crate::{Error, Result};

const FIRST_PID: u32 = 1000;

#[derive(Debug, Clone)]
struct MemoryEntity {
    entity: HostEntity,
    properties: BTreeMap<String, String>,
    ignores_graceful: bool,
    visible: bool,
}

impl MemoryEntity {
    fn snapshot(&self) -> HostEntity {
        let mut entity = self.entity.clone();
        entity.owner = self.properties.get(OWNER_PROPERTY).cloned();
        entity.spawn_token = self.properties.get(SPAWN_PROPERTY).cloned();
        entity
    }
}

#[derive(Debug)]
struct Inner {
    current_tag: Tag,
    named_tags: BTreeSet<String>,
    entities: BTreeMap<EntityId, MemoryEntity>,
    next_id: u64,
    refused: HashSet<String>,
    hidden: HashSet<String>,
    stubborn: HashSet<String>,
    spawned: Vec<SpawnRequest>,
    signals: Vec<(EntityId, ShutdownSignal)>,
    notifications: Vec<(NotifyLevel, String)>,
    closed_tags: Vec<Tag>,
}

#[derive(Debug)]
pub struct MemoryHost {
    inner: Mutex<Inner>,
}

impl Default for MemoryHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::with_current_tag(Tag::Numeric(1))
    }

    pub fn with_current_tag(tag: Tag) -> Self {
        Self {
            inner: Mutex::new(Inner {
                current_tag: tag,
                named_tags: BTreeSet::new(),
                entities: BTreeMap::new(),
                next_id: 0,
                refused: HashSet::new(),
                hidden: HashSet::new(),
                stubborn: HashSet::new(),
                spawned: Vec::new(),
                signals: Vec::new(),
                notifications: Vec::new(),
                closed_tags: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock only means a test thread panicked mid-call.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_current_tag(&self, tag: Tag) {
        self.lock().current_tag = tag;
    }

    /// Refuse spawns of `program` (resource exhaustion, bad tag, ...).
    pub fn refuse_spawn(&self, program: &str) {
        self.lock().refused.insert(program.to_string());
    }

    /// Spawns of `program` succeed but the entity never shows up.
    pub fn hide_spawns(&self, program: &str) {
        self.lock().hidden.insert(program.to_string());
    }

    /// Entities running `program` survive graceful signals.
    pub fn ignore_graceful(&self, program: &str) {
        self.lock().stubborn.insert(program.to_string());
    }

    /// Add a pre-existing entity, e.g. a window opened by the user.
    pub fn add_entity(&self, entity: HostEntity) -> EntityId {
        let mut inner = self.lock();
        let id = entity.id.clone();
        let mut properties = BTreeMap::new();
        if let Some(owner) = &entity.owner {
            properties.insert(OWNER_PROPERTY.to_string(), owner.clone());
        }
        if let Some(token) = &entity.spawn_token {
            properties.insert(SPAWN_PROPERTY.to_string(), token.clone());
        }
        let ignores_graceful = inner.stubborn.contains(&entity.command);
        inner.entities.insert(
            id.clone(),
            MemoryEntity {
                entity,
                properties,
                ignores_graceful,
                visible: true,
            },
        );
        id
    }

    /// Make an entity disappear, as if its window was closed while loom was
    /// not looking.
    pub fn close_entity(&self, id: &EntityId) -> bool {
        self.lock().entities.remove(id).is_some()
    }

    pub fn entity(&self, id: &EntityId) -> Option<HostEntity> {
        self.lock()
            .entities
            .get(id)
            .filter(|e| e.visible)
            .map(MemoryEntity::snapshot)
    }

    pub fn entities(&self) -> Vec<HostEntity> {
        self.lock()
            .entities
            .values()
            .filter(|e| e.visible)
            .map(MemoryEntity::snapshot)
            .collect()
    }

    pub fn spawned(&self) -> Vec<SpawnRequest> {
        self.lock().spawned.clone()
    }

    pub fn signals(&self) -> Vec<(EntityId, ShutdownSignal)> {
        self.lock().signals.clone()
    }

    pub fn notifications(&self) -> Vec<(NotifyLevel, String)> {
        self.lock().notifications.clone()
    }

    pub fn closed_tags(&self) -> Vec<Tag> {
        self.lock().closed_tags.clone()
    }

    pub fn named_tags(&self) -> Vec<String> {
        self.lock().named_tags.iter().cloned().collect()
    }
}

impl Host for MemoryHost {
    fn get_current_tag(&self) -> Result<Tag> {
        Ok(self.lock().current_tag.clone())
    }

    fn create_tag(&self, name: &str) -> Result<Tag> {
        self.lock().named_tags.insert(name.to_string());
        Ok(Tag::Named(name.to_string()))
    }

    fn close_tag(&self, tag: &Tag) -> Result<()> {
        let mut inner = self.lock();
        if let Tag::Named(name) = tag {
            inner.named_tags.remove(name);
            inner.closed_tags.push(tag.clone());
        }
        Ok(())
    }

    fn assign_entity_to_tag(&self, entity: &EntityId, tag: &Tag) -> Result<()> {
        let mut inner = self.lock();
        if let Tag::Named(name) = tag {
            inner.named_tags.insert(name.clone());
        }
        let target = inner
            .entities
            .get_mut(entity)
            .filter(|e| e.visible)
            .ok_or_else(|| Error::Host(format!("No such entity: {}", entity)))?;
        target.entity.tag = Some(tag.clone());
        Ok(())
    }

    fn list_entities(&self, filter: &EntityFilter) -> Result<Vec<HostEntity>> {
        Ok(self
            .lock()
            .entities
            .values()
            .filter(|e| e.visible)
            .map(MemoryEntity::snapshot)
            .filter(|e| filter.matches(e))
            .collect())
    }

    fn spawn(&self, request: &SpawnRequest) -> Result<SpawnToken> {
        let program = request
            .argv
            .first()
            .ok_or_else(|| Error::Validation("Command cannot be empty".to_string()))?;
        let command = Path::new(program)
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or(program)
            .to_string();

        let mut inner = self.lock();
        if inner.refused.contains(&command) {
            return Err(Error::Host(format!("spawn of '{}' refused", command)));
        }
        inner.spawned.push(request.clone());

        inner.next_id += 1;
        let id = EntityId::new(format!("mem-{}", inner.next_id));
        let pid = FIRST_PID + inner.next_id as u32;
        let mut properties = BTreeMap::new();
        properties.insert(SPAWN_PROPERTY.to_string(), request.token.0.clone());
        let visible = !inner.hidden.contains(&command);
        let ignores_graceful = inner.stubborn.contains(&command);
        let tag = Some(inner.current_tag.clone());

        trace!(%id, token = %request.token, visible, "MemoryHost spawn");
        inner.entities.insert(
            id.clone(),
            MemoryEntity {
                entity: HostEntity {
                    id,
                    pid: Some(pid),
                    tag,
                    title: request.argv.join(" "),
                    workdir: request.workdir.clone(),
                    command,
                    owner: None,
                    spawn_token: None,
                },
                properties,
                ignores_graceful,
                visible,
            },
        );
        Ok(request.token.clone())
    }

    fn set_entity_property(&self, entity: &EntityId, key: &str, value: &str) -> Result<()> {
        let mut inner = self.lock();
        let target = inner
            .entities
            .get_mut(entity)
            .ok_or_else(|| Error::Host(format!("No such entity: {}", entity)))?;
        target.properties.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn get_entity_property(&self, entity: &EntityId, key: &str) -> Result<Option<String>> {
        Ok(self
            .lock()
            .entities
            .get(entity)
            .and_then(|e| e.properties.get(key).cloned()))
    }

    fn signal_entity(&self, entity: &EntityId, signal: ShutdownSignal) -> Result<()> {
        let mut inner = self.lock();
        inner.signals.push((entity.clone(), signal));
        let survives = match inner.entities.get(entity) {
            Some(e) => signal.is_graceful() && e.ignores_graceful,
            None => return Ok(()),
        };
        if !survives {
            inner.entities.remove(entity);
        }
        Ok(())
    }

    fn entity_alive(&self, entity: &EntityId) -> Result<bool> {
        Ok(self.lock().entities.contains_key(entity))
    }

    fn notify(&self, message: &str, level: NotifyLevel) -> Result<()> {
        self.lock().notifications.push((level, message.to_string()));
        Ok(())
    }
}

//! Entity registry
//!
//! Tracks registered entities with platform unique_id binding, device
//! linking, and multiple indexes for fast lookups. The primary index keeps
//! registration order, so per-device listings are deterministic.

use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use haven_core::EntityId;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::storage::{Storable, Storage, StorageResult};

/// Errors from entity registry operations
#[derive(Debug, Error, Clone)]
pub enum EntityRegistryError {
    #[error("entity not found: {0}")]
    NotFound(String),
}

/// Storage key for the entity registry
pub const STORAGE_KEY: &str = "core.entity_registry";
/// Current storage version
pub const STORAGE_VERSION: u32 = 1;
/// Current minor version
pub const STORAGE_MINOR_VERSION: u32 = 2;

/// Reason an entity was disabled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisabledBy {
    /// Disabled through its config entry
    ConfigEntry,
    /// Disabled because its device is disabled
    Device,
    /// Disabled by the hub itself
    Hub,
    /// Disabled by the integration
    Integration,
    /// Disabled by the user
    User,
}

/// Reason an entity was hidden
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HiddenBy {
    /// Hidden by the integration
    Integration,
    /// Hidden by the user
    User,
}

/// A registered entity entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityEntry {
    /// Stable registry id (lowercase ULID), survives entity_id renames
    pub id: String,
    /// Full entity id (`domain.object_id`)
    pub entity_id: String,
    /// Platform-scoped unique identifier
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unique_id: Option<String>,

    /// Parent device id
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    /// Config entry that created this entity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_entry_id: Option<String>,

    /// User-set name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Platform default name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_name: Option<String>,

    /// Integration platform that provides this entity
    pub platform: String,

    /// User-set device class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_class: Option<String>,
    /// Platform default device class
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_device_class: Option<String>,

    /// Disable reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_by: Option<DisabledBy>,
    /// Hidden reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hidden_by: Option<HiddenBy>,

    /// Custom icon
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    /// Creation timestamp
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Last modified timestamp
    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
}

impl EntityEntry {
    /// Create a new entry with the minimal required fields.
    pub fn new(
        entity_id: impl Into<String>,
        platform: impl Into<String>,
        unique_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ulid::Ulid::new().to_string().to_lowercase(),
            entity_id: entity_id.into(),
            unique_id,
            device_id: None,
            config_entry_id: None,
            name: None,
            original_name: None,
            platform: platform.into(),
            device_class: None,
            original_device_class: None,
            disabled_by: None,
            hidden_by: None,
            icon: None,
            created_at: now,
            modified_at: now,
        }
    }

    /// Domain half of the entity id.
    pub fn domain(&self) -> &str {
        self.entity_id.split('.').next().unwrap_or(&self.entity_id)
    }

    /// Object id half of the entity id.
    pub fn object_id(&self) -> &str {
        self.entity_id.split('.').nth(1).unwrap_or(&self.entity_id)
    }

    /// Device class with the user override taking precedence.
    pub fn effective_device_class(&self) -> Option<&str> {
        self.device_class
            .as_deref()
            .or(self.original_device_class.as_deref())
    }

    /// Display name with the user override taking precedence.
    pub fn display_name(&self) -> Option<&str> {
        self.name.as_deref().or(self.original_name.as_deref())
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled_by.is_some()
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden_by.is_some()
    }
}

/// Entity registry payload for storage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityRegistryData {
    /// All registered entities, in registration order
    pub entities: Vec<EntityEntry>,
    /// Soft-deleted entities kept for restoration
    #[serde(default)]
    pub deleted_entities: Vec<EntityEntry>,
}

impl Storable for EntityRegistryData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

/// Index key scoping a unique_id to its platform.
fn unique_key(platform: &str, unique_id: &str) -> String {
    format!("{platform}:{unique_id}")
}

/// Entity registry with multi-index support
///
/// Lookups by entity_id, `(platform, unique_id)`, device, config entry and
/// platform. Entries are stored as `Arc<EntityEntry>` so reads never clone
/// the entry itself.
///
/// The primary index is an `IndexMap` behind an `RwLock`: registration order
/// is part of the contract for per-device listings. Secondary indexes hold
/// entity_id sets and are consulted for membership only.
pub struct EntityRegistry {
    /// Storage backend
    storage: Arc<Storage>,

    /// Primary index: entity_id -> entry, in registration order
    by_entity_id: RwLock<IndexMap<String, Arc<EntityEntry>>>,

    /// Index: `platform:unique_id` -> entity_id
    by_unique_id: DashMap<String, String>,

    /// Index: device_id -> entity_ids
    by_device_id: DashMap<String, HashSet<String>>,

    /// Index: config_entry_id -> entity_ids
    by_config_entry_id: DashMap<String, HashSet<String>>,

    /// Index: platform -> entity_ids
    by_platform: DashMap<String, HashSet<String>>,

    /// Soft-deleted entries keyed by (domain, platform, unique_id)
    deleted: RwLock<IndexMap<(String, String, String), Arc<EntityEntry>>>,
}

impl EntityRegistry {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            by_entity_id: RwLock::new(IndexMap::new()),
            by_unique_id: DashMap::new(),
            by_device_id: DashMap::new(),
            by_config_entry_id: DashMap::new(),
            by_platform: DashMap::new(),
            deleted: RwLock::new(IndexMap::new()),
        }
    }

    /// Load entries from storage.
    pub async fn load(&self) -> StorageResult<()> {
        if let Some(data) = self.storage.load_storable::<EntityRegistryData>().await? {
            info!("loading {} entities from storage", data.entities.len());

            for entry in data.entities {
                self.index_entry(Arc::new(entry));
            }

            for entry in data.deleted_entities {
                let Some(unique_id) = entry.unique_id.clone() else {
                    continue;
                };
                let key = (entry.domain().to_string(), entry.platform.clone(), unique_id);
                if let Ok(mut deleted) = self.deleted.write() {
                    deleted.insert(key, Arc::new(entry));
                }
            }
        }
        Ok(())
    }

    /// Save entries to storage.
    pub async fn save(&self) -> StorageResult<()> {
        let entities: Vec<EntityEntry> = self
            .by_entity_id
            .read()
            .map(|idx| idx.values().map(|e| (**e).clone()).collect())
            .unwrap_or_default();

        let deleted_entities: Vec<EntityEntry> = self
            .deleted
            .read()
            .map(|d| d.values().map(|e| (**e).clone()).collect())
            .unwrap_or_default();

        let data = EntityRegistryData {
            entities,
            deleted_entities,
        };
        self.storage.save_storable(&data).await?;
        debug!("saved {} entities to storage", self.len());
        Ok(())
    }

    /// Insert an entry into the primary and all secondary indexes.
    fn index_entry(&self, entry: Arc<EntityEntry>) {
        let entity_id = entry.entity_id.clone();

        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id
                .insert(unique_key(&entry.platform, unique_id), entity_id.clone());
        }

        if let Some(ref device_id) = entry.device_id {
            self.by_device_id
                .entry(device_id.clone())
                .or_default()
                .insert(entity_id.clone());
        }

        if let Some(ref config_entry_id) = entry.config_entry_id {
            self.by_config_entry_id
                .entry(config_entry_id.clone())
                .or_default()
                .insert(entity_id.clone());
        }

        self.by_platform
            .entry(entry.platform.clone())
            .or_default()
            .insert(entity_id.clone());

        if let Ok(mut idx) = self.by_entity_id.write() {
            idx.insert(entity_id, entry);
        }
    }

    /// Drop an entry from the secondary indexes. The caller has already
    /// removed it from the primary index.
    fn unindex_entry(&self, entry: &EntityEntry) {
        let entity_id = &entry.entity_id;

        if let Some(ref unique_id) = entry.unique_id {
            self.by_unique_id
                .remove(&unique_key(&entry.platform, unique_id));
        }

        if let Some(ref device_id) = entry.device_id {
            if let Some(mut ids) = self.by_device_id.get_mut(device_id) {
                ids.remove(entity_id);
            }
        }

        if let Some(ref config_entry_id) = entry.config_entry_id {
            if let Some(mut ids) = self.by_config_entry_id.get_mut(config_entry_id) {
                ids.remove(entity_id);
            }
        }

        if let Some(mut ids) = self.by_platform.get_mut(&entry.platform) {
            ids.remove(entity_id);
        }
    }

    /// Get an entry by entity_id.
    pub fn get(&self, entity_id: &str) -> Option<Arc<EntityEntry>> {
        self.by_entity_id
            .read()
            .ok()
            .and_then(|idx| idx.get(entity_id).cloned())
    }

    /// Get an entry by its platform-scoped unique_id.
    pub fn get_by_unique_id(&self, platform: &str, unique_id: &str) -> Option<Arc<EntityEntry>> {
        self.by_unique_id
            .get(&unique_key(platform, unique_id))
            .and_then(|entity_id| self.get(&entity_id))
    }

    /// Entries whose entity_id is in `ids`, in registration order.
    fn ordered_subset(&self, ids: HashSet<String>) -> Vec<Arc<EntityEntry>> {
        if ids.is_empty() {
            return Vec::new();
        }
        self.by_entity_id
            .read()
            .map(|idx| {
                idx.values()
                    .filter(|e| ids.contains(&e.entity_id))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All entries linked to a device, in registration order.
    pub fn entries_for_device(&self, device_id: &str) -> Vec<Arc<EntityEntry>> {
        let ids = self
            .by_device_id
            .get(device_id)
            .map(|r| r.clone())
            .unwrap_or_default();
        self.ordered_subset(ids)
    }

    /// All entries created by a config entry, in registration order.
    pub fn entries_for_config_entry(&self, config_entry_id: &str) -> Vec<Arc<EntityEntry>> {
        let ids = self
            .by_config_entry_id
            .get(config_entry_id)
            .map(|r| r.clone())
            .unwrap_or_default();
        self.ordered_subset(ids)
    }

    /// All entries provided by a platform, in registration order.
    pub fn entries_for_platform(&self, platform: &str) -> Vec<Arc<EntityEntry>> {
        let ids = self
            .by_platform
            .get(platform)
            .map(|r| r.clone())
            .unwrap_or_default();
        self.ordered_subset(ids)
    }

    /// Register an entity, or return the entry already bound to its
    /// `(platform, unique_id)`.
    ///
    /// Resolution order:
    /// 1. A live entry with the same platform and unique_id wins.
    /// 2. A soft-deleted entry with the same (domain, platform, unique_id)
    ///    is restored, keeping its registry id and settings.
    /// 3. An entry holding the suggested entity_id without a unique_id is
    ///    adopted when the caller supplies one.
    /// 4. Otherwise a new entry is created; a taken entity_id gets a
    ///    `_2`, `_3`, ... suffix.
    pub fn get_or_create(
        &self,
        platform: &str,
        suggested: &EntityId,
        unique_id: Option<&str>,
        device_id: Option<&str>,
        config_entry_id: Option<&str>,
    ) -> Arc<EntityEntry> {
        if let Some(uid) = unique_id {
            if let Some(existing) = self.get_by_unique_id(platform, uid) {
                debug!(
                    "entity {} already registered for {}:{}",
                    existing.entity_id, platform, uid
                );
                return existing;
            }

            let deleted_key = (
                suggested.domain().to_string(),
                platform.to_string(),
                uid.to_string(),
            );
            let deleted_entry = self
                .deleted
                .write()
                .ok()
                .and_then(|mut d| d.shift_remove(&deleted_key));
            if let Some(deleted_entry) = deleted_entry {
                // Restore under a currently free entity_id, keeping the
                // registry id and created_at from the deleted entry.
                let mut restored = (*deleted_entry).clone();
                restored.entity_id =
                    self.generate_entity_id(suggested.domain(), suggested.object_id());
                restored.modified_at = Utc::now();

                let arc_entry = Arc::new(restored);
                self.index_entry(Arc::clone(&arc_entry));

                info!("restored deleted entity: {}", arc_entry.entity_id);
                return arc_entry;
            }
        }

        if let Some(existing) = self.get(suggested.as_str()) {
            if existing.platform == platform && existing.unique_id.is_none() {
                match unique_id {
                    None => return existing,
                    Some(uid) => {
                        if let Ok(updated) = self.update(suggested.as_str(), |e| {
                            e.unique_id = Some(uid.to_string());
                        }) {
                            debug!("bound {}:{} to existing entity {}", platform, uid, updated.entity_id);
                            return updated;
                        }
                    }
                }
            }
            // The suggested id belongs to an unrelated entry; the new one
            // gets a suffixed id below.
        }

        let entity_id = self.generate_entity_id(suggested.domain(), suggested.object_id());
        let mut entry = EntityEntry::new(&entity_id, platform, unique_id.map(String::from));
        entry.device_id = device_id.map(String::from);
        entry.config_entry_id = config_entry_id.map(String::from);

        let arc_entry = Arc::new(entry);
        self.index_entry(Arc::clone(&arc_entry));

        info!("registered new entity: {}", entity_id);
        arc_entry
    }

    /// Update an entry in place.
    ///
    /// The entry is removed, cloned, mutated through the closure, then
    /// re-indexed, so every secondary index reflects the change.
    /// `modified_at` is bumped only when the closure changed something.
    pub fn update<F>(&self, entity_id: &str, f: F) -> Result<Arc<EntityEntry>, EntityRegistryError>
    where
        F: FnOnce(&mut EntityEntry),
    {
        let arc_entry = self
            .by_entity_id
            .write()
            .ok()
            .and_then(|mut idx| idx.shift_remove(entity_id));

        let Some(arc_entry) = arc_entry else {
            return Err(EntityRegistryError::NotFound(entity_id.to_string()));
        };

        let mut entry = (*arc_entry).clone();
        self.unindex_entry(&entry);

        let before = entry.clone();
        f(&mut entry);
        if entry != before {
            entry.modified_at = Utc::now();
        }

        let new_arc = Arc::new(entry);
        self.index_entry(Arc::clone(&new_arc));

        Ok(new_arc)
    }

    /// Remove an entity.
    ///
    /// Entries with a unique_id are kept as soft-deleted so a later
    /// registration of the same (domain, platform, unique_id) restores them.
    pub fn remove(&self, entity_id: &str) -> Option<Arc<EntityEntry>> {
        let arc_entry = self
            .by_entity_id
            .write()
            .ok()
            .and_then(|mut idx| idx.shift_remove(entity_id));

        let arc_entry = arc_entry?;
        self.unindex_entry(&arc_entry);

        if let Some(ref unique_id) = arc_entry.unique_id {
            let key = (
                arc_entry.domain().to_string(),
                arc_entry.platform.clone(),
                unique_id.clone(),
            );
            if let Ok(mut deleted) = self.deleted.write() {
                deleted.insert(key, Arc::clone(&arc_entry));
            }
        }

        info!("removed entity: {}", entity_id);
        Some(arc_entry)
    }

    /// All registered entity ids, in registration order.
    pub fn entity_ids(&self) -> Vec<String> {
        self.by_entity_id
            .read()
            .map(|idx| idx.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// All entries, in registration order.
    pub fn entries(&self) -> Vec<Arc<EntityEntry>> {
        self.by_entity_id
            .read()
            .map(|idx| idx.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.by_entity_id.read().map(|idx| idx.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether an entity_id is registered.
    pub fn is_registered(&self, entity_id: &str) -> bool {
        self.by_entity_id
            .read()
            .map(|idx| idx.contains_key(entity_id))
            .unwrap_or(false)
    }

    /// Count of soft-deleted entries.
    pub fn deleted_len(&self) -> usize {
        self.deleted.read().map(|d| d.len()).unwrap_or(0)
    }

    /// Pick an entity_id that is not registered yet.
    ///
    /// Tries `domain.object_id` first, then `domain.object_id_2` and so on.
    /// With n registered entries at most n+1 candidates can collide, so the
    /// loop terminates.
    pub fn generate_entity_id(&self, domain: &str, suggested_object_id: &str) -> String {
        let preferred = format!("{}.{}", domain, suggested_object_id);
        if !self.is_registered(&preferred) {
            return preferred;
        }

        let mut tries = 1;
        loop {
            tries += 1;
            let candidate = format!("{}_{}", preferred, tries);
            if !self.is_registered(&candidate) {
                return candidate;
            }
        }
    }
}

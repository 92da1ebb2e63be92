//! Device registry
//!
//! Tracks physical devices by identifier and connection tuples, merging
//! repeat registrations into the existing entry.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::entity_registry::DisabledBy;
use crate::storage::{Storable, Storage, StorageResult};

/// Storage key for the device registry
pub const STORAGE_KEY: &str = "core.device_registry";
/// Current storage version
pub const STORAGE_VERSION: u32 = 1;
/// Current minor version
pub const STORAGE_MINOR_VERSION: u32 = 2;

/// Connection type for network MAC addresses
pub const CONNECTION_NETWORK_MAC: &str = "mac";

/// A `(domain, id)` pair uniquely identifying a device within an integration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceIdentifier(pub String, pub String);

impl DeviceIdentifier {
    pub fn new(domain: impl Into<String>, id: impl Into<String>) -> Self {
        Self(domain.into(), id.into())
    }

    pub fn domain(&self) -> &str {
        &self.0
    }

    pub fn id(&self) -> &str {
        &self.1
    }

    /// Index key.
    pub fn key(&self) -> String {
        format!("{}:{}", self.0, self.1)
    }
}

/// A `(type, id)` pair describing how a device is reachable
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceConnection(pub String, pub String);

impl DeviceConnection {
    pub fn new(conn_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self(conn_type.into(), id.into())
    }

    /// Like [`DeviceConnection::new`] but with MAC addresses normalized
    /// through [`format_mac`].
    pub fn normalized(conn_type: impl Into<String>, id: impl Into<String>) -> Self {
        let conn_type = conn_type.into();
        let raw = id.into();
        let id = if conn_type == CONNECTION_NETWORK_MAC {
            format_mac(&raw)
        } else {
            raw
        };
        Self(conn_type, id)
    }

    pub fn connection_type(&self) -> &str {
        &self.0
    }

    pub fn id(&self) -> &str {
        &self.1
    }

    /// Index key.
    pub fn key(&self) -> String {
        format!("{}:{}", self.0, self.1)
    }
}

/// Normalize a MAC address to lowercase colon-separated form.
///
/// Accepts colon, dash and dot separated forms as well as 12 bare hex
/// digits. Anything else is returned unchanged.
pub fn format_mac(mac: &str) -> String {
    let count = |sep: char| mac.chars().filter(|c| *c == sep).count();

    if mac.len() == 17 && count(':') == 5 {
        return mac.to_ascii_lowercase();
    }

    let hex: String = if mac.len() == 17 && count('-') == 5 {
        mac.chars().filter(|c| *c != '-').collect()
    } else if mac.len() == 14 && count('.') == 2 {
        mac.chars().filter(|c| *c != '.').collect()
    } else if mac.len() == 12 {
        mac.to_string()
    } else {
        return mac.to_string();
    };

    if hex.len() != 12 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
        return mac.to_string();
    }

    let lower = hex.to_ascii_lowercase();
    lower
        .as_bytes()
        .chunks(2)
        .map(|pair| std::str::from_utf8(pair).unwrap_or(""))
        .collect::<Vec<_>>()
        .join(":")
}

/// A registered device entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceEntry {
    /// Internal id (UUID, hex without dashes)
    pub id: String,

    /// Integration-scoped identifiers, e.g. `[("soundhub", "ctl-1")]`
    #[serde(default)]
    pub identifiers: Vec<DeviceIdentifier>,

    /// Connections, e.g. `[("mac", "aa:bb:cc:dd:ee:ff")]`
    #[serde(default)]
    pub connections: Vec<DeviceConnection>,

    /// Config entries this device belongs to
    #[serde(default)]
    pub config_entries: Vec<String>,

    /// Device name from the integration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// User-set name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_by_user: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manufacturer: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sw_version: Option<String>,

    /// Parent device for devices reached through another one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub via_device_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disabled_by: Option<DisabledBy>,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub modified_at: DateTime<Utc>,
}

impl DeviceEntry {
    pub fn new(name: Option<&str>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().simple().to_string(),
            identifiers: Vec::new(),
            connections: Vec::new(),
            config_entries: Vec::new(),
            name: name.map(String::from),
            name_by_user: None,
            manufacturer: None,
            model: None,
            sw_version: None,
            via_device_id: None,
            disabled_by: None,
            created_at: now,
            modified_at: now,
        }
    }

    /// Display name with the user override taking precedence.
    pub fn display_name(&self) -> &str {
        self.name_by_user
            .as_deref()
            .or(self.name.as_deref())
            .unwrap_or("")
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled_by.is_some()
    }

    pub fn with_identifier(mut self, domain: impl Into<String>, id: impl Into<String>) -> Self {
        self.identifiers.push(DeviceIdentifier::new(domain, id));
        self
    }

    pub fn with_connection(mut self, conn_type: impl Into<String>, id: impl Into<String>) -> Self {
        self.connections
            .push(DeviceConnection::normalized(conn_type, id));
        self
    }

    pub fn with_config_entry(mut self, config_entry_id: impl Into<String>) -> Self {
        let id = config_entry_id.into();
        if !self.config_entries.contains(&id) {
            self.config_entries.push(id);
        }
        self
    }
}

/// Device registry payload for storage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceRegistryData {
    /// All registered devices
    pub devices: Vec<DeviceEntry>,
    /// Soft-deleted devices
    #[serde(default)]
    pub deleted_devices: Vec<DeviceEntry>,
}

impl Storable for DeviceRegistryData {
    const KEY: &'static str = STORAGE_KEY;
    const VERSION: u32 = STORAGE_VERSION;
    const MINOR_VERSION: u32 = STORAGE_MINOR_VERSION;
}

/// Device registry with identifier and connection indexes
///
/// Entries are stored as `Arc<DeviceEntry>` so reads never clone the entry.
pub struct DeviceRegistry {
    /// Storage backend
    storage: Arc<Storage>,

    /// Primary index: device id -> entry
    by_id: DashMap<String, Arc<DeviceEntry>>,

    /// Index: identifier key -> device id
    by_identifier: DashMap<String, String>,

    /// Index: connection key -> device id
    by_connection: DashMap<String, String>,

    /// Index: config_entry_id -> device ids
    by_config_entry_id: DashMap<String, HashSet<String>>,

    /// Soft-deleted devices
    deleted: DashMap<String, Arc<DeviceEntry>>,
}

impl DeviceRegistry {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            by_id: DashMap::new(),
            by_identifier: DashMap::new(),
            by_connection: DashMap::new(),
            by_config_entry_id: DashMap::new(),
            deleted: DashMap::new(),
        }
    }

    /// Load entries from storage.
    pub async fn load(&self) -> StorageResult<()> {
        if let Some(data) = self.storage.load_storable::<DeviceRegistryData>().await? {
            info!("loading {} devices from storage", data.devices.len());

            for entry in data.devices {
                self.index_entry(Arc::new(entry));
            }
            for entry in data.deleted_devices {
                self.deleted.insert(entry.id.clone(), Arc::new(entry));
            }
        }
        Ok(())
    }

    /// Save entries to storage.
    pub async fn save(&self) -> StorageResult<()> {
        let data = DeviceRegistryData {
            devices: self.by_id.iter().map(|r| (**r.value()).clone()).collect(),
            deleted_devices: self.deleted.iter().map(|r| (**r.value()).clone()).collect(),
        };
        self.storage.save_storable(&data).await?;
        debug!("saved {} devices to storage", self.by_id.len());
        Ok(())
    }

    fn index_entry(&self, entry: Arc<DeviceEntry>) {
        let device_id = entry.id.clone();

        for identifier in &entry.identifiers {
            self.by_identifier
                .insert(identifier.key(), device_id.clone());
        }
        for connection in &entry.connections {
            self.by_connection
                .insert(connection.key(), device_id.clone());
        }
        for config_entry_id in &entry.config_entries {
            self.by_config_entry_id
                .entry(config_entry_id.clone())
                .or_default()
                .insert(device_id.clone());
        }

        self.by_id.insert(device_id, entry);
    }

    /// Drop an entry from the secondary indexes. The caller has already
    /// removed it from the primary index.
    fn unindex_entry(&self, entry: &DeviceEntry) {
        for identifier in &entry.identifiers {
            self.by_identifier.remove(&identifier.key());
        }
        for connection in &entry.connections {
            self.by_connection.remove(&connection.key());
        }
        for config_entry_id in &entry.config_entries {
            if let Some(mut ids) = self.by_config_entry_id.get_mut(config_entry_id) {
                ids.remove(&entry.id);
            }
        }
    }

    /// Get a device by id.
    pub fn get(&self, device_id: &str) -> Option<Arc<DeviceEntry>> {
        self.by_id.get(device_id).map(|r| Arc::clone(r.value()))
    }

    /// Get a device by identifier.
    pub fn get_by_identifier(&self, domain: &str, id: &str) -> Option<Arc<DeviceEntry>> {
        self.by_identifier
            .get(&format!("{}:{}", domain, id))
            .and_then(|device_id| self.get(&device_id))
    }

    /// Get a device by connection. MAC addresses are normalized before the
    /// lookup so any accepted spelling resolves.
    pub fn get_by_connection(&self, conn_type: &str, id: &str) -> Option<Arc<DeviceEntry>> {
        let conn = DeviceConnection::normalized(conn_type, id);
        self.by_connection
            .get(&conn.key())
            .and_then(|device_id| self.get(&device_id))
    }

    /// Find a device matching any of the given identifiers or connections.
    pub fn find(
        &self,
        identifiers: &[DeviceIdentifier],
        connections: &[DeviceConnection],
    ) -> Option<Arc<DeviceEntry>> {
        for ident in identifiers {
            if let Some(entry) = self.get_by_identifier(ident.domain(), ident.id()) {
                return Some(entry);
            }
        }
        for conn in connections {
            if let Some(entry) = self.get_by_connection(conn.connection_type(), conn.id()) {
                return Some(entry);
            }
        }
        None
    }

    /// All devices belonging to a config entry.
    pub fn devices_for_config_entry(&self, config_entry_id: &str) -> Vec<Arc<DeviceEntry>> {
        self.by_config_entry_id
            .get(config_entry_id)
            .map(|ids| ids.iter().filter_map(|id| self.get(id)).collect())
            .unwrap_or_default()
    }

    /// Register a device, or merge into the entry already matching one of
    /// its identifiers or connections.
    pub fn get_or_create(
        &self,
        identifiers: &[DeviceIdentifier],
        connections: &[DeviceConnection],
        config_entry_id: Option<&str>,
        name: Option<&str>,
    ) -> Arc<DeviceEntry> {
        let connections: Vec<DeviceConnection> = connections
            .iter()
            .map(|c| DeviceConnection::normalized(c.connection_type(), c.id()))
            .collect();

        if let Some(existing) = self.find(identifiers, &connections) {
            debug!("found existing device {}", existing.id);

            let entry_missing = config_entry_id
                .map(|ce| !existing.config_entries.iter().any(|e| e == ce))
                .unwrap_or(false);
            let new_idents: Vec<_> = identifiers
                .iter()
                .filter(|i| !existing.identifiers.contains(i))
                .cloned()
                .collect();
            let new_conns: Vec<_> = connections
                .iter()
                .filter(|c| !existing.connections.contains(c))
                .cloned()
                .collect();

            if entry_missing || !new_idents.is_empty() || !new_conns.is_empty() {
                if let Some(updated) = self.update(&existing.id, |e| {
                    if entry_missing {
                        if let Some(ce) = config_entry_id {
                            e.config_entries.push(ce.to_string());
                        }
                    }
                    e.identifiers.extend(new_idents);
                    e.connections.extend(new_conns);
                }) {
                    return updated;
                }
            }
            return existing;
        }

        let mut entry = DeviceEntry::new(name);
        entry.identifiers = identifiers.to_vec();
        entry.connections = connections;
        if let Some(ce) = config_entry_id {
            entry.config_entries.push(ce.to_string());
        }

        let arc_entry = Arc::new(entry);
        self.index_entry(Arc::clone(&arc_entry));

        info!("registered new device: {} ({:?})", arc_entry.id, name);
        arc_entry
    }

    /// Update a device entry in place.
    ///
    /// The entry is removed, cloned, mutated through the closure, then
    /// re-indexed. `modified_at` is bumped only when the closure changed
    /// something.
    pub fn update<F>(&self, device_id: &str, f: F) -> Option<Arc<DeviceEntry>>
    where
        F: FnOnce(&mut DeviceEntry),
    {
        let (_, arc_entry) = self.by_id.remove(device_id)?;

        let mut entry = (*arc_entry).clone();
        self.unindex_entry(&entry);

        let before = entry.clone();
        f(&mut entry);
        if entry != before {
            entry.modified_at = Utc::now();
        }

        let new_arc = Arc::new(entry);
        self.index_entry(Arc::clone(&new_arc));

        Some(new_arc)
    }

    /// Remove a device, keeping it as soft-deleted.
    pub fn remove(&self, device_id: &str) -> Option<Arc<DeviceEntry>> {
        let (_, arc_entry) = self.by_id.remove(device_id)?;
        self.unindex_entry(&arc_entry);
        self.deleted
            .insert(device_id.to_string(), Arc::clone(&arc_entry));
        info!("removed device: {}", device_id);
        Some(arc_entry)
    }

    /// Detach a config entry from every device that references it.
    ///
    /// A device whose only config entry it was is removed outright.
    pub fn clear_config_entry(&self, config_entry_id: &str) {
        let device_ids: Vec<String> = self
            .devices_for_config_entry(config_entry_id)
            .iter()
            .map(|d| d.id.clone())
            .collect();

        for device_id in device_ids {
            let last_entry = match self.get(&device_id) {
                Some(entry) => entry.config_entries.len() <= 1,
                None => continue,
            };

            if last_entry {
                self.remove(&device_id);
            } else {
                self.update(&device_id, |entry| {
                    entry.config_entries.retain(|id| id != config_entry_id);
                });
            }
        }
    }

    /// All registered device ids.
    pub fn device_ids(&self) -> Vec<String> {
        self.by_id.iter().map(|r| r.key().clone()).collect()
    }

    /// All device entries.
    pub fn devices(&self) -> Vec<Arc<DeviceEntry>> {
        self.by_id.iter().map(|r| Arc::clone(r.value())).collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

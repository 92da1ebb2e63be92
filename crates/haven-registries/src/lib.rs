//! Haven registries
//!
//! Persistent registries tracking entities and devices, backed by versioned
//! JSON files in the hub's `.storage/` directory.

pub mod storage;

pub mod device_registry;
pub mod entity_registry;

pub use storage::{Storable, Storage, StorageError, StorageFile, StorageResult};

pub use entity_registry::{
    DisabledBy, EntityEntry, EntityRegistry, EntityRegistryData, EntityRegistryError, HiddenBy,
};

pub use device_registry::{
    format_mac, DeviceConnection, DeviceEntry, DeviceIdentifier, DeviceRegistry,
    DeviceRegistryData, CONNECTION_NETWORK_MAC,
};

use std::sync::Arc;

/// Entity and device registries sharing one storage backend.
pub struct Registries {
    pub storage: Arc<Storage>,
    pub entities: Arc<EntityRegistry>,
    pub devices: Arc<DeviceRegistry>,
}

impl Registries {
    /// Create registries rooted at the given config directory.
    pub fn new(config_dir: impl AsRef<std::path::Path>) -> Self {
        let storage = Arc::new(Storage::new(config_dir));

        Self {
            entities: Arc::new(EntityRegistry::new(storage.clone())),
            devices: Arc::new(DeviceRegistry::new(storage.clone())),
            storage,
        }
    }

    /// Load all registries from storage.
    pub async fn load_all(&self) -> StorageResult<()> {
        self.entities.load().await?;
        self.devices.load().await?;
        Ok(())
    }

    /// Save all registries to storage.
    pub async fn save_all(&self) -> StorageResult<()> {
        self.entities.save().await?;
        self.devices.save().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_registries_bundle() {
        let temp_dir = TempDir::new().unwrap();
        let registries = Registries::new(temp_dir.path());

        let device = registries.devices.get_or_create(
            &[DeviceIdentifier::new("soundhub", "ctl-1")],
            &[],
            Some("ce1"),
            Some("Controller"),
        );

        registries.entities.get_or_create(
            "soundhub",
            &"media_player.controller".parse().unwrap(),
            Some("ctl-1-player"),
            Some(&device.id),
            Some("ce1"),
        );

        registries.save_all().await.unwrap();

        let reloaded = Registries::new(temp_dir.path());
        reloaded.load_all().await.unwrap();

        assert_eq!(reloaded.entities.len(), 1);
        assert_eq!(reloaded.devices.len(), 1);

        let entity = reloaded.entities.get("media_player.controller").unwrap();
        assert_eq!(entity.device_id.as_deref(), Some(device.id.as_str()));
        assert_eq!(reloaded.entities.entries_for_device(&device.id).len(), 1);
    }
}

//! Versioned JSON persistence under the hub's `.storage/` directory.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;
use tracing::{debug, warn};

/// Storage errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("storage file not found: {key}")]
    NotFound { key: String },

    #[error("storage version mismatch for {key}: supported {supported}, found {found}")]
    VersionMismatch {
        key: String,
        supported: u32,
        found: u32,
    },
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// On-disk wrapper carrying version metadata around the payload.
///
/// ```json
/// {
///   "version": 1,
///   "minor_version": 1,
///   "key": "core.entity_registry",
///   "data": { ... }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageFile<T> {
    /// Major version, bumped on breaking format changes
    pub version: u32,
    /// Minor version, bumped on additive changes
    pub minor_version: u32,
    /// Storage key (also the file name)
    pub key: String,
    /// The payload
    pub data: T,
}

impl<T> StorageFile<T> {
    pub fn new(key: impl Into<String>, data: T, version: u32, minor_version: u32) -> Self {
        Self {
            version,
            minor_version,
            key: key.into(),
            data,
        }
    }
}

/// Types persisted through [`Storage`] under a fixed key.
pub trait Storable: Serialize + DeserializeOwned {
    /// Storage key for this type
    const KEY: &'static str;
    /// Current major version
    const VERSION: u32;
    /// Current minor version
    const MINOR_VERSION: u32;

    /// Wrap a clone of `self` in a [`StorageFile`] with the current versions.
    fn as_storage_file(&self) -> StorageFile<Self>
    where
        Self: Clone,
    {
        StorageFile::new(Self::KEY, self.clone(), Self::VERSION, Self::MINOR_VERSION)
    }
}

/// Handle on the `.storage/` directory inside the hub config directory.
#[derive(Debug, Clone)]
pub struct Storage {
    storage_dir: PathBuf,
}

impl Storage {
    /// Create a storage handle rooted at `<config_dir>/.storage`.
    pub fn new(config_dir: impl AsRef<Path>) -> Self {
        Self {
            storage_dir: config_dir.as_ref().join(".storage"),
        }
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Create the storage directory if it does not exist yet.
    pub async fn ensure_dir(&self) -> StorageResult<()> {
        if !self.storage_dir.exists() {
            fs::create_dir_all(&self.storage_dir).await?;
            debug!("created storage directory {:?}", self.storage_dir);
        }
        Ok(())
    }

    /// File path for a storage key.
    pub fn path_for(&self, key: &str) -> PathBuf {
        self.storage_dir.join(key)
    }

    /// Whether a file exists for the key.
    pub async fn exists(&self, key: &str) -> bool {
        self.path_for(key).exists()
    }

    /// Load a storage file, or `None` when the key has never been saved.
    pub async fn load<T>(&self, key: &str) -> StorageResult<Option<StorageFile<T>>>
    where
        T: DeserializeOwned,
    {
        let path = self.path_for(key);

        if !path.exists() {
            debug!("storage file not found: {}", key);
            return Ok(None);
        }

        let content = fs::read_to_string(&path).await?;
        let file: StorageFile<T> = serde_json::from_str(&content)?;

        debug!(
            "loaded storage file {} (v{}.{})",
            key, file.version, file.minor_version
        );

        Ok(Some(file))
    }

    /// Load a storage file, erroring when the key has never been saved.
    pub async fn load_required<T>(&self, key: &str) -> StorageResult<StorageFile<T>>
    where
        T: DeserializeOwned,
    {
        self.load(key).await?.ok_or_else(|| StorageError::NotFound {
            key: key.to_string(),
        })
    }

    /// Load a [`Storable`] payload, enforcing its major version.
    ///
    /// A file written by a newer major version is rejected rather than
    /// silently misread. An older minor version only warns.
    pub async fn load_storable<T>(&self) -> StorageResult<Option<T>>
    where
        T: Storable,
    {
        let Some(file) = self.load::<T>(T::KEY).await? else {
            return Ok(None);
        };

        if file.version != T::VERSION {
            return Err(StorageError::VersionMismatch {
                key: T::KEY.to_string(),
                supported: T::VERSION,
                found: file.version,
            });
        }
        if file.minor_version < T::MINOR_VERSION {
            warn!(
                "storage {} written at v{}.{}, current is v{}.{}",
                T::KEY,
                file.version,
                file.minor_version,
                T::VERSION,
                T::MINOR_VERSION
            );
        }

        Ok(Some(file.data))
    }

    /// Save a storage file atomically.
    ///
    /// Writes to `<key>.tmp` first and renames over the target so a crash
    /// mid-write never leaves a truncated file behind.
    pub async fn save<T>(&self, file: &StorageFile<T>) -> StorageResult<()>
    where
        T: Serialize,
    {
        self.ensure_dir().await?;

        let path = self.path_for(&file.key);
        let temp_path = self.path_for(&format!("{}.tmp", file.key));

        let content = serde_json::to_string_pretty(file)?;

        fs::write(&temp_path, &content).await?;
        fs::rename(&temp_path, &path).await?;

        debug!(
            "saved storage file {} (v{}.{})",
            file.key, file.version, file.minor_version
        );

        Ok(())
    }

    /// Save a [`Storable`] payload under its own key and versions.
    pub async fn save_storable<T>(&self, data: &T) -> StorageResult<()>
    where
        T: Storable + Clone,
    {
        self.save(&data.as_storage_file()).await
    }

    /// Delete a storage file if present.
    pub async fn delete(&self, key: &str) -> StorageResult<()> {
        let path = self.path_for(key);

        if path.exists() {
            fs::remove_file(&path).await?;
            debug!("deleted storage file {}", key);
        }

        Ok(())
    }
}

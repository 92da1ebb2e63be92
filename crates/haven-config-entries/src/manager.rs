//! Config entry store with setup/unload orchestration
//!
//! Entries are indexed by id, by domain, and by `(domain, unique_id)`.
//! The unique id index is what keeps a discovered device from being
//! configured twice. Setup and unload run registered per-domain handlers
//! and drive the entry through its lifecycle states; runtime state is
//! never persisted, so every entry comes back as `NotLoaded` after a
//! restart.

use dashmap::DashMap;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use haven_registries::storage::{Storable, Storage, StorageError};

use crate::entry::{ConfigEntry, ConfigEntryDisabledBy, ConfigEntryState, ConfigEntryUpdate};
use crate::state_machine::{calculate_retry_delay, InvalidTransition};

#[derive(Debug, Error)]
pub enum ConfigEntriesError {
    #[error("config entry not found: {0}")]
    NotFound(String),

    #[error("config entry already exists for {domain} with unique id {unique_id}")]
    AlreadyExists { domain: String, unique_id: String },

    #[error(transparent)]
    InvalidState(#[from] InvalidTransition),

    #[error("cannot unload config entry in state {0:?}")]
    CannotUnload(ConfigEntryState),

    #[error("setup failed: {0}")]
    SetupFailed(String),

    #[error("unload failed: {0}")]
    UnloadFailed(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

pub type ConfigEntriesResult<T> = Result<T, ConfigEntriesError>;

/// Why a setup handler could not bring an entry up.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetupError {
    /// Permanent failure, the entry goes to `SetupError`.
    Failed(String),
    /// Transient failure (device offline, network down), the entry goes
    /// to `SetupRetry` and keeps its retry counter.
    NotReady(String),
}

pub type SetupResult = Result<(), SetupError>;

/// Per-domain setup handler. Receives a snapshot of the entry.
pub type SetupHandler = Arc<dyn Fn(ConfigEntry) -> BoxFuture<'static, SetupResult> + Send + Sync>;

/// Per-domain unload handler.
pub type UnloadHandler =
    Arc<dyn Fn(ConfigEntry) -> BoxFuture<'static, Result<(), String>> + Send + Sync>;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct ConfigEntriesData {
    entries: Vec<ConfigEntry>,
}

impl Storable for ConfigEntriesData {
    const KEY: &'static str = "core.config_entries";
    const VERSION: u32 = 1;
    const MINOR_VERSION: u32 = 1;
}

/// Store of all config entries.
pub struct ConfigEntries {
    storage: Arc<Storage>,

    entries: DashMap<String, ConfigEntry>,
    by_domain: DashMap<String, HashSet<String>>,
    by_unique_id: DashMap<(String, String), String>,

    setup_handlers: DashMap<String, SetupHandler>,
    unload_handlers: DashMap<String, UnloadHandler>,

    // Serializes setup so two flows finishing at once cannot interleave
    // lifecycle transitions for the same entry.
    setup_lock: Mutex<()>,
}

impl ConfigEntries {
    pub fn new(storage: Arc<Storage>) -> Self {
        Self {
            storage,
            entries: DashMap::new(),
            by_domain: DashMap::new(),
            by_unique_id: DashMap::new(),
            setup_handlers: DashMap::new(),
            unload_handlers: DashMap::new(),
            setup_lock: Mutex::new(()),
        }
    }

    /// Load persisted entries. Runtime state is not stored, so every
    /// entry starts over as `NotLoaded` with a zeroed retry counter.
    pub async fn load(&self) -> ConfigEntriesResult<()> {
        let Some(data) = self.storage.load_storable::<ConfigEntriesData>().await? else {
            debug!("no stored config entries");
            return Ok(());
        };

        for entry in data.entries {
            self.index(&entry);
            self.entries.insert(entry.entry_id.clone(), entry);
        }

        debug!(count = self.entries.len(), "loaded config entries");
        Ok(())
    }

    pub async fn save(&self) -> ConfigEntriesResult<()> {
        let mut entries: Vec<ConfigEntry> = self.entries.iter().map(|e| e.clone()).collect();
        // ULIDs sort by creation time.
        entries.sort_by(|a, b| a.entry_id.cmp(&b.entry_id));

        self.storage
            .save_storable(&ConfigEntriesData { entries })
            .await?;
        Ok(())
    }

    fn index(&self, entry: &ConfigEntry) {
        self.by_domain
            .entry(entry.domain.clone())
            .or_default()
            .insert(entry.entry_id.clone());

        if let Some(unique_id) = &entry.unique_id {
            self.by_unique_id.insert(
                (entry.domain.clone(), unique_id.clone()),
                entry.entry_id.clone(),
            );
        }
    }

    fn unindex(&self, entry: &ConfigEntry) {
        if let Some(mut ids) = self.by_domain.get_mut(&entry.domain) {
            ids.remove(&entry.entry_id);
        }

        if let Some(unique_id) = &entry.unique_id {
            self.by_unique_id
                .remove(&(entry.domain.clone(), unique_id.clone()));
        }
    }

    /// Register handlers invoked when entries of `domain` are set up or
    /// unloaded.
    pub fn register_setup_handler<F, Fut>(&self, domain: impl Into<String>, handler: F)
    where
        F: Fn(ConfigEntry) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SetupResult> + Send + 'static,
    {
        let handler =
            move |entry: ConfigEntry| -> BoxFuture<'static, SetupResult> { Box::pin(handler(entry)) };
        self.setup_handlers.insert(domain.into(), Arc::new(handler));
    }

    pub fn register_unload_handler<F, Fut>(&self, domain: impl Into<String>, handler: F)
    where
        F: Fn(ConfigEntry) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), String>> + Send + 'static,
    {
        let handler = move |entry: ConfigEntry| -> BoxFuture<'static, Result<(), String>> {
            Box::pin(handler(entry))
        };
        self.unload_handlers.insert(domain.into(), Arc::new(handler));
    }

    /// Add a new entry.
    ///
    /// An entry with a unique id is rejected when the same `(domain,
    /// unique_id)` pair is already configured.
    pub fn add(&self, entry: ConfigEntry) -> ConfigEntriesResult<ConfigEntry> {
        if let Some(unique_id) = &entry.unique_id {
            let key = (entry.domain.clone(), unique_id.clone());
            if self.by_unique_id.contains_key(&key) {
                return Err(ConfigEntriesError::AlreadyExists {
                    domain: entry.domain.clone(),
                    unique_id: unique_id.clone(),
                });
            }
        }

        self.index(&entry);
        self.entries.insert(entry.entry_id.clone(), entry.clone());

        debug!(
            entry_id = %entry.entry_id,
            domain = %entry.domain,
            title = %entry.title,
            "added config entry"
        );
        Ok(entry)
    }

    pub fn get(&self, entry_id: &str) -> Option<ConfigEntry> {
        self.entries.get(entry_id).map(|e| e.clone())
    }

    pub fn get_by_unique_id(&self, domain: &str, unique_id: &str) -> Option<ConfigEntry> {
        let entry_id = self
            .by_unique_id
            .get(&(domain.to_string(), unique_id.to_string()))?
            .clone();
        self.get(&entry_id)
    }

    /// All entries for a domain, in creation order.
    pub fn entries_for_domain(&self, domain: &str) -> Vec<ConfigEntry> {
        let Some(ids) = self.by_domain.get(domain) else {
            return Vec::new();
        };

        let mut entries: Vec<ConfigEntry> =
            ids.iter().filter_map(|id| self.get(id)).collect();
        entries.sort_by(|a, b| a.entry_id.cmp(&b.entry_id));
        entries
    }

    pub fn loaded_for_domain(&self, domain: &str) -> Vec<ConfigEntry> {
        self.entries_for_domain(domain)
            .into_iter()
            .filter(|e| e.is_loaded())
            .collect()
    }

    /// Whether any entry exists for the domain, loaded or not.
    pub fn has_entries(&self, domain: &str) -> bool {
        self.by_domain
            .get(domain)
            .is_some_and(|ids| !ids.is_empty())
    }

    pub fn entries(&self) -> Vec<ConfigEntry> {
        let mut entries: Vec<ConfigEntry> = self.entries.iter().map(|e| e.clone()).collect();
        entries.sort_by(|a, b| a.entry_id.cmp(&b.entry_id));
        entries
    }

    pub fn entry_ids(&self) -> Vec<String> {
        self.entries().into_iter().map(|e| e.entry_id).collect()
    }

    pub fn domains(&self) -> Vec<String> {
        let mut domains: Vec<String> = self
            .by_domain
            .iter()
            .filter(|kv| !kv.value().is_empty())
            .map(|kv| kv.key().clone())
            .collect();
        domains.sort();
        domains
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Apply field updates to an entry. Moving to an already claimed
    /// unique id is rejected.
    pub fn update(
        &self,
        entry_id: &str,
        update: ConfigEntryUpdate,
    ) -> ConfigEntriesResult<ConfigEntry> {
        let mut entry = self
            .entries
            .get_mut(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if let Some(Some(new_unique_id)) = &update.unique_id {
            let key = (entry.domain.clone(), new_unique_id.clone());
            if let Some(owner) = self.by_unique_id.get(&key) {
                if *owner != entry.entry_id {
                    return Err(ConfigEntriesError::AlreadyExists {
                        domain: entry.domain.clone(),
                        unique_id: new_unique_id.clone(),
                    });
                }
            }
        }

        if let Some(title) = update.title {
            entry.title = title;
        }
        if let Some(data) = update.data {
            entry.data = data;
        }
        if let Some(options) = update.options {
            entry.options = options;
        }
        if let Some(unique_id) = update.unique_id {
            if let Some(old) = &entry.unique_id {
                self.by_unique_id
                    .remove(&(entry.domain.clone(), old.clone()));
            }
            if let Some(new) = &unique_id {
                self.by_unique_id
                    .insert((entry.domain.clone(), new.clone()), entry.entry_id.clone());
            }
            entry.unique_id = unique_id;
        }
        if let Some(version) = update.version {
            entry.version = version;
        }
        if let Some(minor_version) = update.minor_version {
            entry.minor_version = minor_version;
        }

        entry.modified_at = chrono::Utc::now();
        Ok(entry.clone())
    }

    pub fn set_disabled_by(
        &self,
        entry_id: &str,
        disabled_by: Option<ConfigEntryDisabledBy>,
    ) -> ConfigEntriesResult<ConfigEntry> {
        let mut entry = self
            .entries
            .get_mut(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        entry.disabled_by = disabled_by;
        entry.modified_at = chrono::Utc::now();
        Ok(entry.clone())
    }

    /// Remove an entry, unloading it first when loaded.
    pub async fn remove(&self, entry_id: &str) -> ConfigEntriesResult<ConfigEntry> {
        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if entry.is_loaded() {
            self.unload(entry_id).await?;
        }

        let (_, entry) = self
            .entries
            .remove(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
        self.unindex(&entry);

        info!(entry_id, domain = %entry.domain, "removed config entry");
        Ok(entry)
    }

    fn set_state(
        &self,
        entry_id: &str,
        state: ConfigEntryState,
        reason: Option<String>,
    ) -> ConfigEntriesResult<()> {
        let mut entry = self
            .entries
            .get_mut(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;
        entry.try_set_state(state, reason)?;
        Ok(())
    }

    /// Set up a config entry by running its domain's setup handler.
    ///
    /// Disabled and already-loaded entries are skipped. A domain without
    /// a handler loads immediately. `NotReady` from the handler parks the
    /// entry in `SetupRetry` without surfacing an error.
    pub async fn setup(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        let _guard = self.setup_lock.lock().await;
        self.setup_locked(entry_id).await
    }

    async fn setup_locked(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if entry.is_disabled() {
            debug!(entry_id, domain = %entry.domain, "skipping setup of disabled entry");
            return Ok(());
        }
        if entry.is_loaded() {
            return Ok(());
        }

        self.set_state(entry_id, ConfigEntryState::SetupInProgress, None)?;

        let Some(handler) = self.setup_handlers.get(&entry.domain).map(|h| Arc::clone(&h))
        else {
            // No handler registered for this domain.
            self.set_state(entry_id, ConfigEntryState::Loaded, None)?;
            return Ok(());
        };

        let snapshot = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        match handler(snapshot).await {
            Ok(()) => {
                self.set_state(entry_id, ConfigEntryState::Loaded, None)?;
                info!(entry_id, domain = %entry.domain, title = %entry.title, "config entry loaded");
                Ok(())
            }
            Err(SetupError::Failed(reason)) => {
                warn!(entry_id, domain = %entry.domain, %reason, "config entry setup failed");
                self.set_state(entry_id, ConfigEntryState::SetupError, Some(reason.clone()))?;
                Err(ConfigEntriesError::SetupFailed(reason))
            }
            Err(SetupError::NotReady(reason)) => {
                self.set_state(entry_id, ConfigEntryState::SetupRetry, Some(reason.clone()))?;
                let tries = self
                    .entries
                    .get_mut(entry_id)
                    .map(|mut e| e.increment_tries())
                    .unwrap_or(0);
                warn!(
                    entry_id,
                    domain = %entry.domain,
                    tries,
                    retry_in_secs = calculate_retry_delay(tries),
                    %reason,
                    "config entry not ready, will retry"
                );
                Ok(())
            }
        }
    }

    /// Unload a config entry by running its domain's unload handler.
    pub async fn unload(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        let entry = self
            .get(entry_id)
            .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

        if entry.state == ConfigEntryState::NotLoaded {
            return Ok(());
        }
        if !entry.supports_unload() {
            return Err(ConfigEntriesError::CannotUnload(entry.state));
        }

        self.set_state(entry_id, ConfigEntryState::UnloadInProgress, None)?;

        if let Some(handler) = self.unload_handlers.get(&entry.domain).map(|h| Arc::clone(&h)) {
            let snapshot = self
                .get(entry_id)
                .ok_or_else(|| ConfigEntriesError::NotFound(entry_id.to_string()))?;

            if let Err(reason) = handler(snapshot).await {
                warn!(entry_id, domain = %entry.domain, %reason, "config entry unload failed");
                self.set_state(
                    entry_id,
                    ConfigEntryState::FailedUnload,
                    Some(reason.clone()),
                )?;
                return Err(ConfigEntriesError::UnloadFailed(reason));
            }
        }

        self.set_state(entry_id, ConfigEntryState::NotLoaded, None)?;
        info!(entry_id, domain = %entry.domain, "config entry unloaded");
        Ok(())
    }

    /// Unload and set up again.
    pub async fn reload(&self, entry_id: &str) -> ConfigEntriesResult<()> {
        self.unload(entry_id).await?;
        self.setup(entry_id).await
    }

    /// Set up every entry in creation order, continuing past failures.
    /// Returns the number of entries that ended up loaded.
    pub async fn setup_all(&self) -> usize {
        let entry_ids = self.entry_ids();
        let mut loaded = 0;

        for entry_id in entry_ids {
            match self.setup(&entry_id).await {
                Ok(()) => {
                    if self.get(&entry_id).is_some_and(|e| e.is_loaded()) {
                        loaded += 1;
                    }
                }
                Err(err) => {
                    warn!(entry_id = %entry_id, error = %err, "config entry setup failed");
                }
            }
        }

        loaded
    }
}

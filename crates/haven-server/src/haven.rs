//! The central Haven instance.
//!
//! [`Haven`] assembles every subsystem in dependency order and hands out
//! shared handles to them. It owns nothing the subsystems do not already
//! share through `Arc`, so cloning handles out of it is cheap.

use std::path::Path;
use std::sync::Arc;

use haven_automation::{AutomationManager, DeviceTriggerRegistry};
use haven_config_entries::{ConfigEntries, ConfigEntriesError, FlowManager};
use haven_event_bus::EventBus;
use haven_registries::{Registries, StorageError};
use haven_service_registry::ServiceRegistry;
use haven_state_machine::StateMachine;
use haven_template::TemplateEngine;
use thiserror::Error;

/// Errors raised while loading or persisting hub state.
#[derive(Debug, Error)]
pub enum HavenError {
    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    ConfigEntries(#[from] ConfigEntriesError),
}

/// The assembled hub.
pub struct Haven {
    /// Event bus for pub/sub communication
    pub bus: Arc<EventBus>,
    /// Current entity states
    pub states: Arc<StateMachine>,
    /// Service registry for service calls
    pub services: Arc<ServiceRegistry>,
    /// Template engine backed by the state machine
    pub templates: Arc<TemplateEngine>,
    /// Entity and device registries plus their storage
    pub registries: Registries,
    /// Config entries and their setup lifecycle
    pub config_entries: Arc<ConfigEntries>,
    /// Config flow manager
    pub flows: Arc<FlowManager>,
    /// Device trigger providers keyed by domain
    pub device_triggers: Arc<DeviceTriggerRegistry>,
    /// Loaded automations
    pub automations: Arc<AutomationManager>,
}

impl Haven {
    /// Wire up a hub rooted at the given config directory.
    pub fn new(config_dir: impl AsRef<Path>) -> Self {
        let bus = Arc::new(EventBus::new());
        let states = Arc::new(StateMachine::new(bus.clone()));
        let services = Arc::new(ServiceRegistry::new(bus.clone()));
        let templates = Arc::new(TemplateEngine::new(states.clone()));
        let registries = Registries::new(config_dir);
        let config_entries = Arc::new(ConfigEntries::new(registries.storage.clone()));
        let flows = Arc::new(FlowManager::new(config_entries.clone()));
        let device_triggers = Arc::new(DeviceTriggerRegistry::new());
        let automations = Arc::new(AutomationManager::new());

        Self {
            bus,
            states,
            services,
            templates,
            registries,
            config_entries,
            flows,
            device_triggers,
            automations,
        }
    }

    /// Load registries and config entries from storage.
    pub async fn load(&self) -> Result<(), HavenError> {
        self.registries.load_all().await?;
        self.config_entries.load().await?;
        Ok(())
    }

    /// Persist registries and config entries.
    pub async fn save(&self) -> Result<(), HavenError> {
        self.registries.save_all().await?;
        self.config_entries.save().await?;
        Ok(())
    }
}

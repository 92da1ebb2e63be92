//! Automation management
//!
//! An automation ties together triggers, conditions, and actions. The
//! AutomationManager owns the set of loaded automations and their runtime
//! bookkeeping; execution itself lives in the server's engine.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::condition::Condition;
use crate::trigger::Trigger;

/// Automation errors
#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("automation not found: {0}")]
    NotFound(String),

    #[error("invalid automation configuration: {0}")]
    InvalidConfig(String),

    #[error("trigger error: {0}")]
    Trigger(#[from] crate::trigger::TriggerError),

    #[error("condition error: {0}")]
    Condition(#[from] crate::condition::ConditionError),

    #[error("action error: {0}")]
    Action(String),
}

/// Result type for automation operations
pub type AutomationResult<T> = Result<T, AutomationError>;

/// How overlapping runs of one automation are handled.
///
/// Plain strings in config; `max` for the queued and parallel modes is a
/// sibling key on the automation, not part of the mode itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Ignore new triggers while a run is in flight
    #[default]
    Single,

    /// Cancel the in-flight run and start over
    Restart,

    /// Run triggers one after another, up to `max` waiting
    Queued,

    /// Run concurrently, up to `max` at once
    Parallel,
}

/// Cap on concurrent or queued runs when the config does not set one.
pub const DEFAULT_MAX_RUNS: usize = 10;

/// Automation configuration as loaded from YAML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutomationConfig {
    /// Unique ID (auto-generated when absent)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Human-readable name
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Triggers that start the automation
    #[serde(default, alias = "trigger")]
    pub triggers: Vec<Trigger>,

    /// Conditions that must pass before actions run
    #[serde(default, alias = "condition")]
    pub conditions: Vec<Condition>,

    /// Actions to execute (raw values, parsed by the script executor)
    #[serde(default, alias = "action")]
    pub actions: Vec<serde_json::Value>,

    #[serde(default)]
    pub mode: ExecutionMode,

    /// Run cap for queued and parallel modes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<usize>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    /// Variables exposed to action templates
    #[serde(default)]
    pub variables: serde_json::Value,
}

fn default_enabled() -> bool {
    true
}

/// A loaded automation with its runtime bookkeeping.
#[derive(Debug, Clone)]
pub struct Automation {
    pub id: String,
    pub alias: Option<String>,
    pub description: Option<String>,
    pub triggers: Vec<Trigger>,
    pub conditions: Vec<Condition>,
    pub actions: Vec<serde_json::Value>,
    pub mode: ExecutionMode,
    /// Resolved run cap
    pub max: usize,
    pub enabled: bool,
    pub variables: serde_json::Value,
    pub last_triggered: Option<DateTime<Utc>>,
    pub current_runs: usize,
}

impl Automation {
    pub fn from_config(config: AutomationConfig) -> Self {
        let id = config.id.unwrap_or_else(|| ulid::Ulid::new().to_string());

        Self {
            id,
            alias: config.alias,
            description: config.description,
            triggers: config.triggers,
            conditions: config.conditions,
            actions: config.actions,
            mode: config.mode,
            max: config.max.unwrap_or(DEFAULT_MAX_RUNS),
            enabled: config.enabled,
            variables: config.variables,
            last_triggered: None,
            current_runs: 0,
        }
    }

    /// Alias when set, otherwise the ID.
    pub fn display_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.id)
    }

    /// Whether a new run may start under the current mode.
    pub fn can_run(&self) -> bool {
        if !self.enabled {
            return false;
        }

        match self.mode {
            ExecutionMode::Single => self.current_runs == 0,
            ExecutionMode::Restart => true,
            ExecutionMode::Queued | ExecutionMode::Parallel => self.current_runs < self.max,
        }
    }
}

/// Holds every loaded automation, keyed by ID.
pub struct AutomationManager {
    automations: DashMap<String, Automation>,
}

impl AutomationManager {
    pub fn new() -> Self {
        Self {
            automations: DashMap::new(),
        }
    }

    /// Load automations from configs, replacing any with the same ID.
    pub fn load(&self, configs: Vec<AutomationConfig>) -> AutomationResult<()> {
        for config in configs {
            let automation = Automation::from_config(config);
            info!(
                id = %automation.id,
                name = automation.display_name(),
                "loaded automation"
            );
            self.automations.insert(automation.id.clone(), automation);
        }
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Automation> {
        self.automations.get(id).map(|a| a.value().clone())
    }

    pub fn all(&self) -> Vec<Automation> {
        self.automations.iter().map(|a| a.value().clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.automations.len()
    }

    pub fn enable(&self, id: &str) -> AutomationResult<()> {
        let mut automation = self
            .automations
            .get_mut(id)
            .ok_or_else(|| AutomationError::NotFound(id.to_string()))?;

        automation.enabled = true;
        info!(name = automation.display_name(), "enabled automation");
        Ok(())
    }

    pub fn disable(&self, id: &str) -> AutomationResult<()> {
        let mut automation = self
            .automations
            .get_mut(id)
            .ok_or_else(|| AutomationError::NotFound(id.to_string()))?;

        automation.enabled = false;
        info!(name = automation.display_name(), "disabled automation");
        Ok(())
    }

    /// Flip enabled, returning the new value.
    pub fn toggle(&self, id: &str) -> AutomationResult<bool> {
        let mut automation = self
            .automations
            .get_mut(id)
            .ok_or_else(|| AutomationError::NotFound(id.to_string()))?;

        automation.enabled = !automation.enabled;
        info!(
            name = automation.display_name(),
            enabled = automation.enabled,
            "toggled automation"
        );
        Ok(automation.enabled)
    }

    pub fn remove(&self, id: &str) -> AutomationResult<Automation> {
        self.automations
            .remove(id)
            .map(|(_, a)| a)
            .ok_or_else(|| AutomationError::NotFound(id.to_string()))
    }

    /// Add a single automation; rejects duplicate IDs.
    pub fn add(&self, config: AutomationConfig) -> AutomationResult<String> {
        let automation = Automation::from_config(config);
        let id = automation.id.clone();

        if self.automations.contains_key(&id) {
            return Err(AutomationError::InvalidConfig(format!(
                "automation with ID {} already exists",
                id
            )));
        }

        info!(id = %id, name = automation.display_name(), "added automation");
        self.automations.insert(id.clone(), automation);
        Ok(id)
    }

    pub fn mark_triggered(&self, id: &str) {
        if let Some(mut automation) = self.automations.get_mut(id) {
            automation.last_triggered = Some(Utc::now());
        }
    }

    /// Claim a run slot if the automation's mode allows one right now.
    ///
    /// Check and increment happen under one entry lock, so concurrent
    /// triggers cannot both claim the last slot.
    pub fn try_start(&self, id: &str) -> bool {
        let Some(mut automation) = self.automations.get_mut(id) else {
            return false;
        };

        if !automation.can_run() {
            debug!(
                name = automation.display_name(),
                mode = ?automation.mode,
                runs = automation.current_runs,
                "run not started, mode limit reached"
            );
            return false;
        }

        automation.current_runs += 1;
        true
    }

    pub fn increment_runs(&self, id: &str) {
        if let Some(mut automation) = self.automations.get_mut(id) {
            automation.current_runs += 1;
            debug!(
                name = automation.display_name(),
                runs = automation.current_runs,
                "run started"
            );
        }
    }

    pub fn decrement_runs(&self, id: &str) {
        if let Some(mut automation) = self.automations.get_mut(id) {
            automation.current_runs = automation.current_runs.saturating_sub(1);
            debug!(
                name = automation.display_name(),
                runs = automation.current_runs,
                "run finished"
            );
        }
    }

    /// Drop everything and load the given configs.
    pub fn reload(&self, configs: Vec<AutomationConfig>) -> AutomationResult<()> {
        self.automations.clear();
        self.load(configs)?;
        info!(count = self.automations.len(), "reloaded automations");
        Ok(())
    }
}

impl Default for AutomationManager {
    fn default() -> Self {
        Self::new()
    }
}

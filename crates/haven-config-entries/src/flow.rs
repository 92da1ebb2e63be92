//! Config flow engine
//!
//! A config flow walks a user (or a discovery event) through the steps
//! needed to produce a config entry: show a form, validate the input,
//! retry on errors, then either create the entry or abort. Integrations
//! implement [`ConfigFlow`] and register a factory per domain; the
//! [`FlowManager`] keeps flows alive between steps and materializes the
//! final entry through [`ConfigEntries`].

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::entry::{ConfigEntry, ConfigEntrySource};
use crate::manager::{ConfigEntries, ConfigEntriesError};

/// User or discovery supplied values for one step.
pub type FlowInput = HashMap<String, serde_json::Value>;

#[derive(Debug, Error)]
pub enum FlowError {
    #[error("no config flow handler registered for domain: {0}")]
    UnknownHandler(String),

    #[error("no config flow in progress with id: {0}")]
    UnknownFlow(String),

    #[error("could not create entry from flow: {0}")]
    CreateEntryFailed(#[from] ConfigEntriesError),
}

/// Outcome of one flow step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FlowResult {
    /// Show a form and wait for input. `errors` carries per-field error
    /// keys from a failed attempt at the same step.
    Form {
        step_id: String,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        errors: HashMap<String, String>,
        #[serde(default, skip_serializing_if = "HashMap::is_empty")]
        description_placeholders: HashMap<String, String>,
    },
    /// Flow finished, a config entry was created.
    CreateEntry {
        title: String,
        data: HashMap<String, serde_json::Value>,
    },
    /// Flow ended without an entry.
    Abort { reason: String },
}

impl FlowResult {
    pub fn form(step_id: impl Into<String>) -> Self {
        Self::Form {
            step_id: step_id.into(),
            errors: HashMap::new(),
            description_placeholders: HashMap::new(),
        }
    }

    pub fn form_with_errors<K, V>(
        step_id: impl Into<String>,
        errors: impl IntoIterator<Item = (K, V)>,
    ) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self::Form {
            step_id: step_id.into(),
            errors: errors
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            description_placeholders: HashMap::new(),
        }
    }

    pub fn create_entry(
        title: impl Into<String>,
        data: HashMap<String, serde_json::Value>,
    ) -> Self {
        Self::CreateEntry {
            title: title.into(),
            data,
        }
    }

    pub fn abort(reason: impl Into<String>) -> Self {
        Self::Abort {
            reason: reason.into(),
        }
    }

    /// Anything but another form ends the flow.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Form { .. })
    }
}

/// SSDP discovery payload handed to a flow's `ssdp` step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SsdpInfo {
    /// Description document URL, e.g. `http://192.168.1.7:60006/desc.xml`
    pub location: String,
    pub friendly_name: Option<String>,
}

impl SsdpInfo {
    pub fn new(location: impl Into<String>, friendly_name: Option<String>) -> Self {
        Self {
            location: location.into(),
            friendly_name,
        }
    }

    pub fn from_input(input: &FlowInput) -> Option<Self> {
        let location = input.get("location")?.as_str()?.to_string();
        let friendly_name = input
            .get("friendly_name")
            .and_then(|v| v.as_str())
            .map(String::from);
        Some(Self {
            location,
            friendly_name,
        })
    }

    pub fn to_input(&self) -> FlowInput {
        let mut input = FlowInput::new();
        input.insert("location".to_string(), self.location.clone().into());
        if let Some(name) = &self.friendly_name {
            input.insert("friendly_name".to_string(), name.clone().into());
        }
        input
    }

    /// Host part of the location URL.
    pub fn host(&self) -> Option<&str> {
        let rest = self
            .location
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(&self.location);
        let end = rest.find([':', '/']).unwrap_or(rest.len());
        let host = &rest[..end];
        (!host.is_empty()).then_some(host)
    }
}

/// Per-flow state shared with the flow implementation.
pub struct FlowContext {
    pub flow_id: String,
    pub domain: String,
    pub source: ConfigEntrySource,
    entries: Arc<ConfigEntries>,
    unique_id: Mutex<Option<String>>,
}

impl FlowContext {
    /// Claim a unique id for the entry this flow will create.
    pub fn set_unique_id(&self, unique_id: impl Into<String>) {
        if let Ok(mut slot) = self.unique_id.lock() {
            *slot = Some(unique_id.into());
        }
    }

    pub fn unique_id(&self) -> Option<String> {
        self.unique_id.lock().map(|slot| slot.clone()).unwrap_or(None)
    }

    /// Whether the claimed unique id already belongs to a config entry.
    /// Flows abort on this instead of configuring a device twice.
    pub fn is_unique_id_configured(&self) -> bool {
        self.unique_id()
            .is_some_and(|uid| self.entries.get_by_unique_id(&self.domain, &uid).is_some())
    }

    /// Config entry store, for flows that inspect existing entries.
    pub fn entries(&self) -> &ConfigEntries {
        &self.entries
    }
}

/// One integration's config flow. Steps are dispatched by id; `input` is
/// `None` the first time a step runs and the form should be shown.
#[async_trait]
pub trait ConfigFlow: Send + Sync {
    async fn handle_step(
        &mut self,
        ctx: &FlowContext,
        step_id: &str,
        input: Option<FlowInput>,
    ) -> FlowResult;
}

/// Creates a fresh flow instance for each started flow.
pub type FlowHandlerFactory = Arc<dyn Fn() -> Box<dyn ConfigFlow> + Send + Sync>;

struct ActiveFlow {
    flow: Box<dyn ConfigFlow>,
    ctx: FlowContext,
    cur_step: String,
}

/// Tracks in-progress config flows and finalizes finished ones.
pub struct FlowManager {
    entries: Arc<ConfigEntries>,
    handlers: DashMap<String, FlowHandlerFactory>,
    flows: Mutex<HashMap<String, ActiveFlow>>,
}

impl FlowManager {
    pub fn new(entries: Arc<ConfigEntries>) -> Self {
        Self {
            entries,
            handlers: DashMap::new(),
            flows: Mutex::new(HashMap::new()),
        }
    }

    pub fn register_handler<F>(&self, domain: impl Into<String>, factory: F)
    where
        F: Fn() -> Box<dyn ConfigFlow> + Send + Sync + 'static,
    {
        self.handlers.insert(domain.into(), Arc::new(factory));
    }

    pub fn has_handler(&self, domain: &str) -> bool {
        self.handlers.contains_key(domain)
    }

    /// Start a flow for `domain`, returning its id and the first result.
    /// Discovery sources pass their payload as `input`; user flows start
    /// with `None` and get the first form back.
    pub async fn init(
        &self,
        domain: &str,
        source: ConfigEntrySource,
        input: Option<FlowInput>,
    ) -> Result<(String, FlowResult), FlowError> {
        let factory = self
            .handlers
            .get(domain)
            .map(|f| Arc::clone(&f))
            .ok_or_else(|| FlowError::UnknownHandler(domain.to_string()))?;

        let flow_id = ulid::Ulid::new().to_string();
        let first_step = match source {
            ConfigEntrySource::User => "user",
            ConfigEntrySource::Import => "import",
            ConfigEntrySource::Ssdp => "ssdp",
        };

        debug!(%flow_id, domain, step = first_step, "starting config flow");

        let active = ActiveFlow {
            flow: factory(),
            ctx: FlowContext {
                flow_id: flow_id.clone(),
                domain: domain.to_string(),
                source,
                entries: Arc::clone(&self.entries),
                unique_id: Mutex::new(None),
            },
            cur_step: first_step.to_string(),
        };

        let result = self.run_step(active, input).await?;
        Ok((flow_id, result))
    }

    /// Feed input to a waiting flow.
    ///
    /// The flow is taken out of the table while its step runs, so a flow
    /// handles one step at a time. It is put back only when the step
    /// returns another form.
    pub async fn configure(
        &self,
        flow_id: &str,
        input: FlowInput,
    ) -> Result<FlowResult, FlowError> {
        let active = self
            .take_flow(flow_id)
            .ok_or_else(|| FlowError::UnknownFlow(flow_id.to_string()))?;

        self.run_step(active, Some(input)).await
    }

    /// Cancel an in-progress flow.
    pub fn abort_flow(&self, flow_id: &str) -> bool {
        self.take_flow(flow_id).is_some()
    }

    pub fn in_progress(&self) -> usize {
        self.flows.lock().map(|flows| flows.len()).unwrap_or(0)
    }

    fn take_flow(&self, flow_id: &str) -> Option<ActiveFlow> {
        self.flows.lock().ok()?.remove(flow_id)
    }

    async fn run_step(
        &self,
        mut active: ActiveFlow,
        input: Option<FlowInput>,
    ) -> Result<FlowResult, FlowError> {
        let step_id = active.cur_step.clone();
        let result = active.flow.handle_step(&active.ctx, &step_id, input).await;

        match &result {
            FlowResult::Form { step_id, .. } => {
                active.cur_step = step_id.clone();
                if let Ok(mut flows) = self.flows.lock() {
                    flows.insert(active.ctx.flow_id.clone(), active);
                }
            }
            FlowResult::Abort { reason } => {
                debug!(flow_id = %active.ctx.flow_id, domain = %active.ctx.domain, %reason, "config flow aborted");
            }
            FlowResult::CreateEntry { title, data } => {
                self.materialize(&active.ctx, title.clone(), data.clone())
                    .await?;
            }
        }

        Ok(result)
    }

    /// Turn a finished flow into a stored, set-up config entry.
    async fn materialize(
        &self,
        ctx: &FlowContext,
        title: String,
        data: HashMap<String, serde_json::Value>,
    ) -> Result<ConfigEntry, FlowError> {
        let mut entry = ConfigEntry::new(ctx.domain.clone(), title)
            .with_data(data)
            .with_source(ctx.source);
        if let Some(unique_id) = ctx.unique_id() {
            entry = entry.with_unique_id(unique_id);
        }

        let entry = self.entries.add(entry)?;
        info!(
            entry_id = %entry.entry_id,
            domain = %entry.domain,
            title = %entry.title,
            "config flow created entry"
        );

        // The entry exists either way; a failed first setup leaves it in
        // SetupError for a later reload.
        if let Err(err) = self.entries.setup(&entry.entry_id).await {
            warn!(entry_id = %entry.entry_id, error = %err, "setup of new entry failed");
        }

        Ok(entry)
    }
}

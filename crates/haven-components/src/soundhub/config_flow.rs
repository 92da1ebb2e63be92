//! Soundhub config flow
//!
//! Single-instance integration: one controller per hub, so every step
//! aborts with `already_setup` once an entry exists. Discovery records
//! candidate hosts under `"Name (IP)"` labels; the user step accepts a raw
//! IP or one of those labels and validates the host by opening and closing
//! a connection to it.

use super::connection::{ConnectionFactory, ConnectionResult};
use super::DOMAIN;
use async_trait::async_trait;
use haven_config_entries::{ConfigFlow, FlowContext, FlowInput, FlowResult, SsdpInfo};
use indexmap::IndexMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

/// Label → host map accumulated from discovery.
///
/// Shared by every flow of the integration; discoveries accumulate in
/// insertion order and a label is dropped once its host is configured.
pub type DiscoveredHosts = Arc<Mutex<IndexMap<String, String>>>;

pub struct SoundhubConfigFlow {
    factory: Arc<dyn ConnectionFactory>,
    discovered: DiscoveredHosts,
}

impl SoundhubConfigFlow {
    pub fn new(factory: Arc<dyn ConnectionFactory>, discovered: DiscoveredHosts) -> Self {
        Self {
            factory,
            discovered,
        }
    }

    /// Resolve a submitted host: a known discovery label maps to its IP,
    /// anything else passes through unchanged.
    fn resolve_host(&self, input: &str) -> String {
        self.discovered
            .lock()
            .ok()
            .and_then(|hosts| hosts.get(input).cloned())
            .unwrap_or_else(|| input.to_string())
    }

    fn record_discovery(&self, label: String, host: String) {
        if let Ok(mut hosts) = self.discovered.lock() {
            debug!(%label, %host, "recorded discovered controller");
            hosts.insert(label, host);
        }
    }

    fn forget_label(&self, label: &str) {
        if let Ok(mut hosts) = self.discovered.lock() {
            hosts.shift_remove(label);
        }
    }

    /// Open a connection to the host and close it again. The connection is
    /// released on both outcomes before the result is inspected.
    async fn validate_host(&self, host: &str) -> ConnectionResult<()> {
        let connection = self.factory.create(host);
        let connected = connection.connect().await;
        connection.disconnect().await;
        connected
    }

    async fn step_user(&self, ctx: &FlowContext, input: Option<FlowInput>) -> FlowResult {
        if ctx.entries().has_entries(DOMAIN) {
            return FlowResult::abort("already_setup");
        }

        let raw = input
            .as_ref()
            .and_then(|i| i.get("host"))
            .and_then(|v| v.as_str())
            .filter(|h| !h.is_empty());
        let Some(raw) = raw else {
            // No host submitted; show the form again without an error.
            return FlowResult::form("user");
        };

        let host = self.resolve_host(raw);

        match self.validate_host(&host).await {
            Ok(()) => {
                ctx.set_unique_id(&host);
                self.forget_label(raw);
                FlowResult::create_entry(
                    format!("Controller ({host})"),
                    [("host".to_string(), host.clone().into())].into(),
                )
            }
            Err(err) => {
                warn!(%host, error = %err, "controller validation failed");
                FlowResult::form_with_errors("user", [("host", "connection_failure")])
            }
        }
    }

    async fn step_ssdp(&self, ctx: &FlowContext, input: Option<FlowInput>) -> FlowResult {
        let info = input.as_ref().and_then(SsdpInfo::from_input);
        let Some(info) = info else {
            return FlowResult::abort("invalid_discovery_info");
        };
        let Some(host) = info.host() else {
            return FlowResult::abort("invalid_discovery_info");
        };

        // Record before the single-instance check so the host is offered
        // again after the configured entry is removed.
        let name = info.friendly_name.as_deref().unwrap_or("Controller");
        self.record_discovery(format!("{name} ({host})"), host.to_string());

        if ctx.entries().has_entries(DOMAIN) {
            return FlowResult::abort("already_setup");
        }

        FlowResult::form("user")
    }
}

#[async_trait]
impl ConfigFlow for SoundhubConfigFlow {
    async fn handle_step(
        &mut self,
        ctx: &FlowContext,
        step_id: &str,
        input: Option<FlowInput>,
    ) -> FlowResult {
        match step_id {
            "user" => self.step_user(ctx, input).await,
            "ssdp" => self.step_ssdp(ctx, input).await,
            _ => FlowResult::abort("unknown_step"),
        }
    }
}

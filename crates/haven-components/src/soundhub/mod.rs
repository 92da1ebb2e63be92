//! Soundhub network audio controller integration.
//!
//! One config entry per hub. The config flow validates a controller host
//! (entered directly or picked from SSDP discoveries) by opening a
//! connection to it; entry setup registers the controller as a device with
//! a `media_player` entity and seeds its state.

pub mod config_flow;
pub mod connection;

pub use config_flow::{DiscoveredHosts, SoundhubConfigFlow};
pub use connection::{
    ConnectionError, ConnectionFactory, ConnectionResult, ControllerConnection,
    TcpConnectionFactory, TcpControllerConnection, CONNECT_TIMEOUT, CONTROLLER_PORT,
};

use haven_config_entries::{ConfigEntries, ConfigFlow, FlowManager, SetupError};
use haven_core::{Context, EntityId};
use haven_registries::device_registry::{DeviceIdentifier, DeviceRegistry};
use haven_registries::entity_registry::EntityRegistry;
use haven_state_machine::StateMachine;
use indexmap::IndexMap;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

pub const DOMAIN: &str = "soundhub";

/// State a freshly set-up controller starts in.
const INITIAL_STATE: &str = "idle";

/// Register the soundhub integration: its config flow plus the setup and
/// unload handlers for its entries.
///
/// Returns the pending-discovery map shared by all soundhub flows so the
/// caller can feed SSDP results into later flows.
pub fn setup_soundhub(
    flows: &FlowManager,
    entries: &Arc<ConfigEntries>,
    entity_registry: Arc<EntityRegistry>,
    device_registry: Arc<DeviceRegistry>,
    states: Arc<StateMachine>,
    factory: Arc<dyn ConnectionFactory>,
) -> DiscoveredHosts {
    let discovered: DiscoveredHosts = Arc::new(Mutex::new(IndexMap::new()));

    let flow_factory = Arc::clone(&factory);
    let flow_discovered = Arc::clone(&discovered);
    flows.register_handler(DOMAIN, move || {
        Box::new(SoundhubConfigFlow::new(
            Arc::clone(&flow_factory),
            Arc::clone(&flow_discovered),
        )) as Box<dyn ConfigFlow>
    });

    let setup_entities = Arc::clone(&entity_registry);
    let setup_devices = Arc::clone(&device_registry);
    let setup_states = Arc::clone(&states);
    entries.register_setup_handler(DOMAIN, move |entry| {
        let factory = Arc::clone(&factory);
        let entities = Arc::clone(&setup_entities);
        let devices = Arc::clone(&setup_devices);
        let states = Arc::clone(&setup_states);
        async move {
            let host = entry
                .data
                .get("host")
                .and_then(|v| v.as_str())
                .ok_or_else(|| SetupError::Failed("entry has no host".to_string()))?
                .to_string();

            // The controller has to be reachable before anything is
            // registered; an offline device retries later.
            let connection = factory.create(&host);
            let connected = connection.connect().await;
            connection.disconnect().await;
            if let Err(err) = connected {
                warn!(%host, error = %err, "controller unreachable during setup");
                return Err(SetupError::NotReady(err.to_string()));
            }

            let device = devices.get_or_create(
                &[DeviceIdentifier::new(DOMAIN, &host)],
                &[],
                Some(&entry.entry_id),
                Some("Controller"),
            );

            let entity_id = EntityId::new("media_player", host_object_id(&host))
                .map_err(|err| SetupError::Failed(err.to_string()))?;
            let registered = entities.get_or_create(
                DOMAIN,
                &entity_id,
                Some(&host),
                Some(&device.id),
                Some(&entry.entry_id),
            );

            let mut attributes = HashMap::new();
            attributes.insert("friendly_name".to_string(), json!("Controller"));
            attributes.insert("host".to_string(), json!(host));
            states.set(entity_id, INITIAL_STATE, attributes, Context::new());

            info!(
                %host,
                entity_id = %registered.entity_id,
                device_id = %device.id,
                "soundhub controller set up"
            );
            Ok(())
        }
    });

    let unload_entities = entity_registry;
    let unload_devices = device_registry;
    entries.register_unload_handler(DOMAIN, move |entry| {
        let entities = Arc::clone(&unload_entities);
        let devices = Arc::clone(&unload_devices);
        let states = Arc::clone(&states);
        async move {
            // Registry entries stay for the next setup; only live state and
            // the device link go away.
            for registered in entities.entries_for_config_entry(&entry.entry_id) {
                if let Ok(entity_id) = registered.entity_id.parse::<EntityId>() {
                    states.remove(&entity_id, Context::new());
                    debug!(entity_id = %registered.entity_id, "removed controller state");
                }
            }
            devices.clear_config_entry(&entry.entry_id);
            Ok(())
        }
    });

    discovered
}

/// Derive a valid object id from a controller host, `127.0.0.1` becoming
/// `soundhub_127_0_0_1`.
fn host_object_id(host: &str) -> String {
    let mut out = String::with_capacity(host.len() + DOMAIN.len() + 1);
    out.push_str(DOMAIN);
    out.push('_');
    for c in host.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_end_matches('_').to_string()
}

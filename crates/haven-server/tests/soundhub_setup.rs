//! Soundhub integration wired through a full hub: config flow, entry
//! setup, unload, and reload across a restart.

mod common;

use async_trait::async_trait;
use common::TestHub;
use haven_components::soundhub::{
    self, ConnectionFactory, ConnectionResult, ControllerConnection, DiscoveredHosts,
};
use haven_config_entries::{ConfigEntrySource, ConfigEntryState, FlowInput, FlowResult, SsdpInfo};
use haven_server::Haven;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::TempDir;

struct CountingConnection {
    connects: Arc<AtomicUsize>,
}

#[async_trait]
impl ControllerConnection for CountingConnection {
    async fn connect(&self) -> ConnectionResult<()> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {}
}

#[derive(Default)]
struct CountingFactory {
    connects: Arc<AtomicUsize>,
}

impl ConnectionFactory for CountingFactory {
    fn create(&self, _host: &str) -> Arc<dyn ControllerConnection> {
        Arc::new(CountingConnection {
            connects: Arc::clone(&self.connects),
        })
    }
}

/// Register the soundhub integration on a hub with an always-reachable
/// mock controller, returning the discovery map and the connect counter.
fn attach_soundhub(haven: &Haven) -> (DiscoveredHosts, Arc<AtomicUsize>) {
    let connects = Arc::new(AtomicUsize::new(0));
    let factory = CountingFactory {
        connects: Arc::clone(&connects),
    };
    let discovered = soundhub::setup_soundhub(
        &haven.flows,
        &haven.config_entries,
        Arc::clone(&haven.registries.entities),
        Arc::clone(&haven.registries.devices),
        Arc::clone(&haven.states),
        Arc::new(factory),
    );
    (discovered, connects)
}

fn host_input(host: &str) -> FlowInput {
    [("host".to_string(), json!(host))].into()
}

#[tokio::test]
async fn user_flow_creates_a_loaded_entry_with_entity_and_state() {
    let hub = TestHub::new();
    let (_discovered, connects) = attach_soundhub(&hub.haven);

    let (flow_id, step) = hub
        .haven
        .flows
        .init("soundhub", ConfigEntrySource::User, None)
        .await
        .unwrap();
    assert_eq!(step, FlowResult::form("user"));

    let result = hub
        .haven
        .flows
        .configure(&flow_id, host_input("10.0.0.9"))
        .await
        .unwrap();
    assert!(matches!(result, FlowResult::CreateEntry { .. }));

    let entry = hub
        .haven
        .config_entries
        .get_by_unique_id("soundhub", "10.0.0.9")
        .expect("flow should have created an entry");
    assert_eq!(entry.state, ConfigEntryState::Loaded);
    assert_eq!(entry.title, "Controller (10.0.0.9)");

    // One connect validating the flow input, one checking reachability
    // during entry setup.
    assert_eq!(connects.load(Ordering::SeqCst), 2);

    let registered = hub
        .haven
        .registries
        .entities
        .entries_for_config_entry(&entry.entry_id);
    assert_eq!(registered.len(), 1);
    assert_eq!(registered[0].entity_id, "media_player.soundhub_10_0_0_9");
    assert!(registered[0].device_id.is_some());

    assert_eq!(
        hub.haven.states.get_state("media_player.soundhub_10_0_0_9"),
        Some("idle".to_string())
    );
}

#[tokio::test]
async fn discovered_label_resolves_to_its_host() {
    let hub = TestHub::new();
    let (discovered, _connects) = attach_soundhub(&hub.haven);

    let info = SsdpInfo::new("http://10.0.0.9:1400/desc.xml", Some("Den".to_string()));
    let (flow_id, step) = hub
        .haven
        .flows
        .init("soundhub", ConfigEntrySource::Ssdp, Some(info.to_input()))
        .await
        .unwrap();
    assert_eq!(step, FlowResult::form("user"));
    assert_eq!(
        discovered.lock().unwrap().get("Den (10.0.0.9)"),
        Some(&"10.0.0.9".to_string())
    );

    // The user picks the advertised label; the entry stores the raw host.
    let result = hub
        .haven
        .flows
        .configure(&flow_id, host_input("Den (10.0.0.9)"))
        .await
        .unwrap();
    let FlowResult::CreateEntry { data, .. } = result else {
        panic!("expected an entry, got {result:?}");
    };
    assert_eq!(data["host"], "10.0.0.9");

    // Configuring the host consumed its discovery label.
    assert!(discovered.lock().unwrap().is_empty());
}

#[tokio::test]
async fn second_controller_flow_aborts() {
    let hub = TestHub::new();
    let (_discovered, _connects) = attach_soundhub(&hub.haven);

    let (flow_id, _) = hub
        .haven
        .flows
        .init("soundhub", ConfigEntrySource::User, None)
        .await
        .unwrap();
    hub.haven
        .flows
        .configure(&flow_id, host_input("10.0.0.9"))
        .await
        .unwrap();

    let (_, step) = hub
        .haven
        .flows
        .init("soundhub", ConfigEntrySource::User, None)
        .await
        .unwrap();
    assert_eq!(step, FlowResult::abort("already_setup"));
}

#[tokio::test]
async fn unload_releases_live_state_but_keeps_registrations() {
    let hub = TestHub::new();
    let (_discovered, _connects) = attach_soundhub(&hub.haven);

    let (flow_id, _) = hub
        .haven
        .flows
        .init("soundhub", ConfigEntrySource::User, None)
        .await
        .unwrap();
    hub.haven
        .flows
        .configure(&flow_id, host_input("10.0.0.9"))
        .await
        .unwrap();

    let entry = hub
        .haven
        .config_entries
        .get_by_unique_id("soundhub", "10.0.0.9")
        .unwrap();
    assert!(hub
        .haven
        .registries
        .devices
        .get_by_identifier("soundhub", "10.0.0.9")
        .is_some());

    hub.haven.config_entries.unload(&entry.entry_id).await.unwrap();

    assert!(hub
        .haven
        .states
        .get("media_player.soundhub_10_0_0_9")
        .is_none());
    assert!(hub
        .haven
        .registries
        .devices
        .get_by_identifier("soundhub", "10.0.0.9")
        .is_none());

    // The registry remembers the entity for the next setup.
    let registered = hub
        .haven
        .registries
        .entities
        .entries_for_config_entry(&entry.entry_id);
    assert_eq!(registered.len(), 1);
}

#[tokio::test]
async fn entries_reload_and_set_up_after_a_restart() {
    let dir = TempDir::new().unwrap();

    {
        let haven = Haven::new(dir.path());
        let (_discovered, _connects) = attach_soundhub(&haven);
        haven.load().await.unwrap();

        let (flow_id, _) = haven
            .flows
            .init("soundhub", ConfigEntrySource::User, None)
            .await
            .unwrap();
        haven
            .flows
            .configure(&flow_id, host_input("10.0.0.9"))
            .await
            .unwrap();

        haven.save().await.unwrap();
    }

    let haven = Haven::new(dir.path());
    let (_discovered, connects) = attach_soundhub(&haven);
    haven.load().await.unwrap();

    let entry = haven
        .config_entries
        .get_by_unique_id("soundhub", "10.0.0.9")
        .expect("entry should have survived the restart");
    assert_eq!(entry.state, ConfigEntryState::NotLoaded);
    assert!(haven.states.get("media_player.soundhub_10_0_0_9").is_none());

    let loaded = haven.config_entries.setup_all().await;
    assert_eq!(loaded, 1);
    assert_eq!(connects.load(Ordering::SeqCst), 1);
    assert_eq!(
        haven.states.get_state("media_player.soundhub_10_0_0_9"),
        Some("idle".to_string())
    );
}

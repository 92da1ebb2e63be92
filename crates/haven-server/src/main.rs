//! Haven hub server binary.
//!
//! Boots a hub from a config directory: loads `configuration.yaml`, restores
//! registries and config entries from storage, registers the built-in
//! components, and runs the automation engine until interrupted.

use std::sync::Arc;

use anyhow::Result;
use haven_components::binary_sensor::device_trigger::BinarySensorTriggerProvider;
use haven_components::soundhub::{self, TcpConnectionFactory};
use haven_config::HubConfig;
use haven_server::{AutomationEngine, Haven};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config_dir = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config".to_string());
    let config = HubConfig::load(&config_dir)?;
    info!(name = %config.name, "starting hub");

    let haven = Haven::new(&config.config_dir);
    haven.load().await?;

    haven
        .device_triggers
        .register(Arc::new(BinarySensorTriggerProvider::new(
            haven.registries.entities.clone(),
        )));

    // Discovered hosts stay alive for the lifetime of the server so the
    // config flow can resolve labels from earlier announcements.
    let _discovered = soundhub::setup_soundhub(
        &haven.flows,
        &haven.config_entries,
        haven.registries.entities.clone(),
        haven.registries.devices.clone(),
        haven.states.clone(),
        Arc::new(TcpConnectionFactory),
    );

    haven.automations.load(config.automations)?;
    info!(automations = haven.automations.count(), "automations loaded");

    let loaded = haven.config_entries.setup_all().await;
    info!(loaded, "config entries set up");

    let engine = AutomationEngine::new(&haven);
    engine.start();

    info!("hub is running");
    tokio::signal::ctrl_c().await?;

    info!("shutting down");
    engine.stop();
    haven.save().await?;

    Ok(())
}

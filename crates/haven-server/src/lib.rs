//! Haven hub server.
//!
//! Assembles the hub ([`Haven`]) and drives automations against the event
//! bus ([`AutomationEngine`]). The `haven` binary in this crate boots a hub
//! from a YAML config directory.

pub mod engine;
pub mod haven;

pub use engine::AutomationEngine;
pub use haven::{Haven, HavenError};

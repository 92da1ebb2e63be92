//! Core types for Haven
//!
//! Fundamental types shared across the Haven hub: EntityId, State, Event,
//! Context, and ServiceCall. Every other crate in the workspace builds on
//! these.

mod context;
mod entity_id;
mod event;
mod service;
mod state;

pub use context::Context;
pub use entity_id::{EntityId, EntityIdError};
pub use event::{events, Event, EventData, EventOrigin, EventType};
pub use service::{ServiceCall, SupportsResponse};
pub use state::State;

/// Maximum length of a state value; longer values are stored as STATE_UNKNOWN.
pub const MAX_STATE_LENGTH: usize = 255;

/// State value of a binary entity that is on.
pub const STATE_ON: &str = "on";

/// State value of a binary entity that is off.
pub const STATE_OFF: &str = "off";

/// State value for an entity whose real state is not known.
pub const STATE_UNKNOWN: &str = "unknown";

/// State value for an entity that is currently unreachable.
pub const STATE_UNAVAILABLE: &str = "unavailable";

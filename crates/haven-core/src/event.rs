//! Events and the typed event-data contract

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Context;

/// Data types that can ride on the bus under a fixed event type.
pub trait EventData: Clone + Send + Sync + 'static {
    /// The event type this payload is fired under.
    fn event_type() -> &'static str;
}

/// Event type key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventType(String);

/// Wildcard event type used by match-all subscriptions.
pub const MATCH_ALL: &str = "*";

impl EventType {
    pub fn new(event_type: impl Into<String>) -> Self {
        Self(event_type.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The wildcard type that matches every event.
    pub fn match_all() -> Self {
        Self(MATCH_ALL.to_string())
    }

    pub fn is_match_all(&self) -> bool {
        self.0 == MATCH_ALL
    }
}

impl From<&str> for EventType {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for EventType {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An event as observed by subscribers.
///
/// `T` defaults to raw JSON; typed subscriptions deserialize into concrete
/// payload types implementing [`EventData`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event<T = serde_json::Value> {
    pub event_type: EventType,
    pub data: T,
    pub origin: EventOrigin,
    pub time_fired: DateTime<Utc>,
    pub context: Context,
}

impl<T> Event<T> {
    /// New locally-originated event stamped with the current time.
    pub fn new(event_type: impl Into<EventType>, data: T, context: Context) -> Self {
        Self {
            event_type: event_type.into(),
            data,
            origin: EventOrigin::Local,
            time_fired: Utc::now(),
            context,
        }
    }

    pub fn with_origin(mut self, origin: EventOrigin) -> Self {
        self.origin = origin;
        self
    }
}

impl<T: EventData> Event<T> {
    /// Build an event whose type comes from the payload type.
    pub fn typed(data: T, context: Context) -> Self {
        Self::new(T::event_type(), data, context)
    }
}

/// Where an event came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventOrigin {
    #[default]
    Local,
    Remote,
}

/// Well-known event types and their payloads.
pub mod events {
    use super::EventData;
    use crate::{EntityId, State};
    use serde::{Deserialize, Serialize};

    /// Fired whenever an entity state is written.
    pub const STATE_CHANGED: &str = "state_changed";

    /// Fired for every service invocation.
    pub const CALL_SERVICE: &str = "call_service";

    /// Fired once the hub has finished starting.
    pub const HAVEN_START: &str = "haven_start";

    /// Fired when the hub begins shutting down.
    pub const HAVEN_STOP: &str = "haven_stop";

    /// Payload of [`STATE_CHANGED`] events.
    ///
    /// `old_state` is `None` for a brand-new entity; `new_state` is `None`
    /// when an entity is removed.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct StateChangedData {
        pub entity_id: EntityId,
        pub old_state: Option<State>,
        pub new_state: Option<State>,
    }

    impl EventData for StateChangedData {
        fn event_type() -> &'static str {
            STATE_CHANGED
        }
    }

    /// Payload of [`CALL_SERVICE`] events.
    #[derive(Debug, Clone, Serialize, Deserialize)]
    pub struct CallServiceData {
        pub domain: String,
        pub service: String,
        pub service_data: serde_json::Value,
    }

    impl EventData for CallServiceData {
        fn event_type() -> &'static str {
            CALL_SERVICE
        }
    }
}

//! Trigger configuration types
//!
//! Triggers describe which events start an automation. The config schema is
//! tagged by `platform`:
//!
//! ```yaml
//! triggers:
//!   - platform: state
//!     entity_id: binary_sensor.hallway_motion
//!     to: "on"
//!     for: "00:00:30"
//!   - platform: device
//!     domain: binary_sensor
//!     device_id: 9f2c1
//!     entity_id: binary_sensor.cellar_leak
//!     type: moist
//! ```

use haven_core::State;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Trigger errors
#[derive(Debug, Error)]
pub enum TriggerError {
    #[error("invalid trigger configuration: {0}")]
    InvalidConfig(String),

    #[error("no device trigger provider registered for domain {0}")]
    UnknownProvider(String),

    #[error("unknown trigger type {trigger_type:?} for {entity_id}")]
    UnknownTriggerType {
        entity_id: String,
        trigger_type: String,
    },
}

/// Result type for trigger operations
pub type TriggerResult<T> = Result<T, TriggerError>;

/// Trigger definition, tagged by `platform`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "platform", rename_all = "snake_case")]
pub enum Trigger {
    /// Fires when an entity's state changes
    State(StateTrigger),

    /// Fires on a device trigger resolved by the owning integration
    Device(DeviceTrigger),

    /// Fires on any event with optional data matching
    Event(EventTrigger),
}

impl Trigger {
    /// The trigger's ID if set.
    pub fn id(&self) -> Option<&str> {
        match self {
            Trigger::State(t) => t.id.as_deref(),
            Trigger::Device(t) => t.id.as_deref(),
            Trigger::Event(t) => t.id.as_deref(),
        }
    }

    /// The platform name this trigger serializes under.
    pub fn platform(&self) -> &'static str {
        match self {
            Trigger::State(_) => "state",
            Trigger::Device(_) => "device",
            Trigger::Event(_) => "event",
        }
    }
}

/// State change trigger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTrigger {
    /// Optional trigger ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Entity IDs to monitor (single or list)
    pub entity_id: EntityIdSpec,

    /// Previous state to match
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from: Option<StateMatch>,

    /// New state to match
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to: Option<StateMatch>,

    /// Don't fire when coming from these states
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_from: Option<StateMatch>,

    /// Don't fire when going to these states
    #[serde(skip_serializing_if = "Option::is_none")]
    pub not_to: Option<StateMatch>,

    /// Attribute to monitor instead of the state value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,

    /// Duration the new state must be held before firing
    #[serde(
        skip_serializing_if = "Option::is_none",
        default,
        with = "option_duration_serde"
    )]
    pub r#for: Option<Duration>,
}

/// Device trigger config, and the descriptor shape integrations list.
///
/// `type` names a transition specific to the entity's device class
/// (`bat_low`, `opened`, `turned_off`, ...); the owning integration resolves
/// it to the state transition it stands for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceTrigger {
    /// Optional trigger ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Integration domain that owns the trigger
    pub domain: String,

    /// Device the trigger belongs to
    pub device_id: String,

    /// Entity the transition is observed on
    pub entity_id: String,

    /// Device-class specific trigger type
    #[serde(rename = "type")]
    pub trigger_type: String,

    /// Duration the state must be held before firing
    #[serde(
        skip_serializing_if = "Option::is_none",
        default,
        with = "option_duration_serde"
    )]
    pub r#for: Option<Duration>,
}

/// Event trigger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventTrigger {
    /// Optional trigger ID
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Event type to match
    pub event_type: String,

    /// Optional event data subset to match
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_data: Option<serde_json::Value>,
}

/// Payload handed to conditions and actions as the `trigger` variable.
///
/// `from_state` and `to_state` are full state snapshots so templates can
/// reach `trigger.to_state.state` and attribute values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerData {
    /// Platform of the trigger that fired
    pub platform: String,

    /// Trigger ID for `trigger.id` dispatch
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// Entity whose transition matched (state and device platforms)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<String>,

    /// State before the transition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_state: Option<State>,

    /// State after the transition
    #[serde(skip_serializing_if = "Option::is_none")]
    pub to_state: Option<State>,

    /// Hold duration that was satisfied, if the trigger had one
    #[serde(
        rename = "for",
        skip_serializing_if = "Option::is_none",
        default,
        with = "option_duration_serde"
    )]
    pub r#for: Option<Duration>,

    /// Raw event payload (event platform)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event: Option<serde_json::Value>,
}

impl TriggerData {
    /// Empty payload for a platform; fields are filled by the evaluator.
    pub fn new(platform: impl Into<String>) -> Self {
        Self {
            platform: platform.into(),
            id: None,
            entity_id: None,
            from_state: None,
            to_state: None,
            r#for: None,
            event: None,
        }
    }
}

// --- Supporting types ---

/// Entity ID specification (single or list)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityIdSpec {
    Single(String),
    List(Vec<String>),
}

impl EntityIdSpec {
    pub fn ids(&self) -> Vec<&str> {
        match self {
            EntityIdSpec::Single(id) => vec![id.as_str()],
            EntityIdSpec::List(ids) => ids.iter().map(|s| s.as_str()).collect(),
        }
    }
}

/// State match specification (single value or list)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum StateMatch {
    Single(String),
    List(Vec<String>),
}

impl StateMatch {
    pub fn matches(&self, state: &str) -> bool {
        match self {
            StateMatch::Single(s) => s == state,
            StateMatch::List(list) => list.iter().any(|s| s == state),
        }
    }
}

// --- Duration serde helpers ---

/// Serializes `Option<Duration>` as `"HH:MM:SS"`, accepting `"HH:MM:SS"`,
/// `"MM:SS"` or bare seconds on the way in.
pub(crate) mod option_duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(d) => {
                let secs = d.as_secs();
                let hours = secs / 3600;
                let mins = (secs % 3600) / 60;
                let secs = secs % 60;
                serializer.serialize_str(&format!("{:02}:{:02}:{:02}", hours, mins, secs))
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Seconds(u64),
            Text(String),
        }

        let opt: Option<Raw> = Option::deserialize(deserializer)?;
        match opt {
            None => Ok(None),
            Some(Raw::Seconds(secs)) => Ok(Some(Duration::from_secs(secs))),
            Some(Raw::Text(s)) => parse_duration(&s)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }

    fn parse_duration(s: &str) -> Result<Duration, String> {
        let parts: Vec<&str> = s.split(':').collect();
        match parts.len() {
            1 => {
                let secs: u64 = parts[0].parse().map_err(|_| "invalid seconds")?;
                Ok(Duration::from_secs(secs))
            }
            2 => {
                let mins: u64 = parts[0].parse().map_err(|_| "invalid minutes")?;
                let secs: u64 = parts[1].parse().map_err(|_| "invalid seconds")?;
                Ok(Duration::from_secs(mins * 60 + secs))
            }
            3 => {
                let hours: u64 = parts[0].parse().map_err(|_| "invalid hours")?;
                let mins: u64 = parts[1].parse().map_err(|_| "invalid minutes")?;
                let secs: u64 = parts[2].parse().map_err(|_| "invalid seconds")?;
                Ok(Duration::from_secs(hours * 3600 + mins * 60 + secs))
            }
            _ => Err("invalid duration format".to_string()),
        }
    }
}

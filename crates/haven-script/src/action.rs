//! Action types
//!
//! Actions are the steps of a script: call a service, wait, fire an event,
//! or set variables for later steps. They deserialize untagged, keyed by
//! their distinctive field (`service`, `delay`, `event`, `variables`).

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Deserialize a field that accepts a single string or a list of strings.
fn string_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrVec {
        String(String),
        Vec(Vec<String>),
    }

    match StringOrVec::deserialize(deserializer)? {
        StringOrVec::String(s) => Ok(vec![s]),
        StringOrVec::Vec(v) => Ok(v),
    }
}

/// Target specification for service calls.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Target {
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "string_or_vec"
    )]
    pub entity_id: Vec<String>,

    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "string_or_vec"
    )]
    pub device_id: Vec<String>,
}

impl Target {
    pub fn is_empty(&self) -> bool {
        self.entity_id.is_empty() && self.device_id.is_empty()
    }
}

/// A single script step.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Action {
    /// Call a service
    Service(ServiceAction),

    /// Pause the sequence
    Delay(DelayAction),

    /// Fire an event on the bus
    Event(EventAction),

    /// Set variables for subsequent steps
    Variables(VariablesAction),
}

/// Service call step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceAction {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    /// Service to call as `domain.service`
    pub service: String,

    /// Entities and devices the call applies to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target: Option<Target>,

    /// Service data; string values may be templates
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub data: HashMap<String, serde_json::Value>,

    /// Variable name to store the service response under
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_variable: Option<String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

/// Delay step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelayAction {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    pub delay: DelaySpec,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// Delay duration forms.
///
/// Bare numbers are seconds; strings may be clock durations ("00:01:30") or
/// templates rendering to one; component objects spell the parts out.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DelaySpec {
    Seconds(u64),
    Text(String),
    Components {
        #[serde(default)]
        hours: u64,
        #[serde(default)]
        minutes: u64,
        #[serde(default)]
        seconds: u64,
        #[serde(default)]
        milliseconds: u64,
    },
}

impl DelaySpec {
    /// Fixed duration, unless the delay needs template rendering first.
    pub fn to_duration(&self) -> Option<Duration> {
        match self {
            DelaySpec::Seconds(secs) => Some(Duration::from_secs(*secs)),
            DelaySpec::Text(_) => None,
            DelaySpec::Components {
                hours,
                minutes,
                seconds,
                milliseconds,
            } => Some(Duration::from_millis(
                hours * 3600 * 1000 + minutes * 60 * 1000 + seconds * 1000 + milliseconds,
            )),
        }
    }
}

/// Event-firing step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventAction {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    /// Event type to fire
    pub event: String,

    /// Event payload; string values may be templates
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub event_data: HashMap<String, serde_json::Value>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

/// Variable-setting step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariablesAction {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alias: Option<String>,

    /// Name to value; string values may be templates
    pub variables: HashMap<String, serde_json::Value>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

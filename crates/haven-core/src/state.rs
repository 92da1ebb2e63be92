//! Entity state snapshots

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{Context, EntityId, STATE_UNAVAILABLE, STATE_UNKNOWN};

/// The state of one entity at a point in time.
///
/// The state value itself is always a string ("on", "off", "17.5", ...);
/// structured data lives in the attribute map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    /// Entity this snapshot belongs to
    pub entity_id: EntityId,

    /// Current state value
    pub state: String,

    /// Attributes attached to the state
    #[serde(default)]
    pub attributes: HashMap<String, serde_json::Value>,

    /// When the state value last changed to something different
    pub last_changed: DateTime<Utc>,

    /// When the state was last written, changed or not
    pub last_updated: DateTime<Utc>,

    /// When the owning integration last reported the state
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_reported: Option<DateTime<Utc>>,

    /// Context of the write that produced this snapshot
    pub context: Context,
}

impl State {
    /// Fresh state with all timestamps set to now.
    pub fn new(
        entity_id: EntityId,
        state: impl Into<String>,
        attributes: HashMap<String, serde_json::Value>,
        context: Context,
    ) -> Self {
        let now = Utc::now();
        Self {
            entity_id,
            state: state.into(),
            attributes,
            last_changed: now,
            last_updated: now,
            last_reported: Some(now),
            context,
        }
    }

    /// Successor snapshot for a new write.
    ///
    /// `last_changed` carries over when the state value is identical, so
    /// "how long has this been on" survives attribute-only updates.
    pub fn with_update(
        &self,
        new_state: impl Into<String>,
        new_attributes: HashMap<String, serde_json::Value>,
        context: Context,
    ) -> Self {
        let now = Utc::now();
        let new_state = new_state.into();
        let changed = self.state != new_state;

        Self {
            entity_id: self.entity_id.clone(),
            state: new_state,
            attributes: new_attributes,
            last_changed: if changed { now } else { self.last_changed },
            last_updated: now,
            last_reported: Some(now),
            context,
        }
    }

    /// Whether the entity is currently unreachable.
    pub fn is_unavailable(&self) -> bool {
        self.state == STATE_UNAVAILABLE
    }

    /// Whether the state value is the unknown placeholder.
    pub fn is_unknown(&self) -> bool {
        self.state == STATE_UNKNOWN
    }

    /// Deserialize one attribute, if present and of the right shape.
    pub fn attribute<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.attributes
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }
}

// Equality ignores timestamps and context: two snapshots with the same
// entity, value, and attributes describe the same state.
impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.entity_id == other.entity_id
            && self.state == other.state
            && self.attributes == other.attributes
    }
}

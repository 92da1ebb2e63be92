//! Current-state store for all entities
//!
//! The StateMachine holds the present state of every entity on the hub,
//! answers point and domain queries, and fires `state_changed` on the event
//! bus for every write. It is the storage half of the state bus; the event
//! bus is the notification half.

use dashmap::DashMap;
use haven_core::events::StateChangedData;
use haven_core::{Context, EntityId, State, MAX_STATE_LENGTH, STATE_UNKNOWN};
use haven_event_bus::EventBus;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Concurrent entity-state container with a by-domain index.
pub struct StateMachine {
    /// Current state per entity id string
    states: DashMap<String, State>,
    /// Entity ids grouped by domain, in first-seen order
    domains: DashMap<String, Vec<String>>,
    bus: Arc<EventBus>,
}

impl StateMachine {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            states: DashMap::new(),
            domains: DashMap::new(),
            bus,
        }
    }

    /// Write an entity state and fire `state_changed`.
    ///
    /// Same-value writes keep `last_changed` from the previous snapshot.
    /// Values longer than [`MAX_STATE_LENGTH`] are stored as the unknown
    /// placeholder.
    #[instrument(skip(self, state, attributes, context), fields(entity_id = %entity_id))]
    pub fn set(
        &self,
        entity_id: EntityId,
        state: impl Into<String>,
        attributes: HashMap<String, serde_json::Value>,
        context: Context,
    ) -> State {
        let mut value = state.into();
        if value.len() > MAX_STATE_LENGTH {
            warn!(
                len = value.len(),
                "state value exceeds maximum length, storing as unknown"
            );
            value = STATE_UNKNOWN.to_string();
        }

        let key = entity_id.as_str().to_string();
        let old = self.states.get(&key).map(|s| s.clone());

        let new = match &old {
            Some(prev) => prev.with_update(value, attributes, context.clone()),
            None => State::new(entity_id.clone(), value, attributes, context.clone()),
        };

        debug!(
            state = %new.state,
            new_entity = old.is_none(),
            "state written"
        );

        self.states.insert(key.clone(), new.clone());
        if old.is_none() {
            self.domains
                .entry(entity_id.domain().to_string())
                .or_default()
                .push(key);
        }

        self.bus.fire_typed(
            StateChangedData {
                entity_id,
                old_state: old,
                new_state: Some(new.clone()),
            },
            context,
        );

        new
    }

    /// Current state snapshot for an entity.
    pub fn get(&self, entity_id: &str) -> Option<State> {
        self.states.get(entity_id).map(|s| s.clone())
    }

    /// Just the state value for an entity.
    pub fn get_state(&self, entity_id: &str) -> Option<String> {
        self.states.get(entity_id).map(|s| s.state.clone())
    }

    /// Whether the entity currently has exactly this state value.
    pub fn is_state(&self, entity_id: &str, state: &str) -> bool {
        self.get_state(entity_id).as_deref() == Some(state)
    }

    /// Entity ids in a domain, in first-seen order.
    pub fn entity_ids(&self, domain: &str) -> Vec<String> {
        self.domains
            .get(domain)
            .map(|ids| ids.clone())
            .unwrap_or_default()
    }

    /// Current states of every entity in a domain.
    pub fn domain_states(&self, domain: &str) -> Vec<State> {
        self.entity_ids(domain)
            .iter()
            .filter_map(|id| self.get(id))
            .collect()
    }

    /// All current states, in no particular order.
    pub fn all(&self) -> Vec<State> {
        self.states.iter().map(|e| e.value().clone()).collect()
    }

    /// All domains that have at least one entity.
    pub fn domains(&self) -> Vec<String> {
        self.domains.iter().map(|e| e.key().clone()).collect()
    }

    /// Drop an entity; fires `state_changed` with `new_state: None`.
    #[instrument(skip(self, context), fields(entity_id = %entity_id))]
    pub fn remove(&self, entity_id: &EntityId, context: Context) -> Option<State> {
        let removed = self.states.remove(entity_id.as_str()).map(|(_, s)| s);

        if let Some(old) = &removed {
            debug!("state removed");
            if let Some(mut ids) = self.domains.get_mut(entity_id.domain()) {
                ids.retain(|id| id != entity_id.as_str());
            }
            self.bus.fire_typed(
                StateChangedData {
                    entity_id: entity_id.clone(),
                    old_state: Some(old.clone()),
                    new_state: None,
                },
                context,
            );
        }

        removed
    }

    /// Number of entities currently tracked.
    pub fn entity_count(&self) -> usize {
        self.states.len()
    }
}

pub type SharedStateMachine = Arc<StateMachine>;

//! Trigger evaluation against incoming events
//!
//! The evaluator decides whether a single event satisfies a trigger
//! configuration. Matches with a `for` qualifier come back as pending; the
//! engine owns the clock and fires them only if the state survives the hold.

use chrono::{DateTime, Utc};
use haven_core::events::{StateChangedData, STATE_CHANGED};
use haven_core::Event;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

use crate::device::DeviceTriggerRegistry;
use crate::trigger::{
    DeviceTrigger, EventTrigger, StateTrigger, Trigger, TriggerData, TriggerError, TriggerResult,
};

/// Outcome of a successful trigger evaluation.
#[derive(Debug, Clone)]
pub enum TriggerMatch {
    /// Fire the automation now.
    Fire(TriggerData),

    /// Fire only after the hold survives; see [`PendingMatch`].
    Hold(PendingMatch),
}

impl TriggerMatch {
    pub fn data(&self) -> &TriggerData {
        match self {
            TriggerMatch::Fire(data) => data,
            TriggerMatch::Hold(pending) => &pending.data,
        }
    }
}

/// A match waiting out its `for` duration.
///
/// The engine sleeps for `duration`, then fires `data` only if the entity
/// still reports `expected_state` with the same `last_changed`. Any
/// interruption, even on-off-on, moves `last_changed` and voids the hold.
#[derive(Debug, Clone)]
pub struct PendingMatch {
    pub data: TriggerData,
    pub entity_id: String,
    pub expected_state: String,
    pub last_changed: DateTime<Utc>,
    pub duration: Duration,
}

/// Stateless event-to-trigger matcher.
///
/// Device triggers are resolved through the registry at evaluation time, so
/// descriptor changes (an entity re-classified after a registry update) take
/// effect without reloading automations.
pub struct TriggerEvaluator {
    device_triggers: Arc<DeviceTriggerRegistry>,
}

impl TriggerEvaluator {
    pub fn new(device_triggers: Arc<DeviceTriggerRegistry>) -> Self {
        Self { device_triggers }
    }

    /// Evaluate a trigger against an event.
    ///
    /// `Ok(None)` means the event simply does not match; errors are reserved
    /// for configs that cannot be evaluated at all.
    pub fn evaluate(
        &self,
        trigger: &Trigger,
        event: &Event,
    ) -> TriggerResult<Option<TriggerMatch>> {
        match trigger {
            Trigger::State(t) => self.eval_state(t, event),
            Trigger::Device(t) => self.eval_device(t, event),
            Trigger::Event(t) => self.eval_event(t, event),
        }
    }

    fn eval_state(
        &self,
        trigger: &StateTrigger,
        event: &Event,
    ) -> TriggerResult<Option<TriggerMatch>> {
        if event.event_type.as_str() != STATE_CHANGED {
            return Ok(None);
        }

        let change: StateChangedData = serde_json::from_value(event.data.clone())
            .map_err(|e| TriggerError::InvalidConfig(format!("bad state_changed payload: {e}")))?;

        let entity_id = change.entity_id.as_str().to_string();
        if !trigger.entity_id.ids().contains(&entity_id.as_str()) {
            return Ok(None);
        }

        // Watch either the state value or one attribute.
        let (old_value, new_value) = match &trigger.attribute {
            Some(attr) => (
                attr_value(change.old_state.as_ref(), attr),
                attr_value(change.new_state.as_ref(), attr),
            ),
            None => (
                change.old_state.as_ref().map(|s| s.state.clone()),
                change.new_state.as_ref().map(|s| s.state.clone()),
            ),
        };

        trace!(entity_id, ?old_value, ?new_value, "state trigger values");

        // Same-value writes are not transitions.
        if old_value == new_value {
            return Ok(None);
        }

        if let (Some(not_from), Some(old)) = (&trigger.not_from, &old_value) {
            if not_from.matches(old) {
                return Ok(None);
            }
        }
        if let (Some(not_to), Some(new)) = (&trigger.not_to, &new_value) {
            if not_to.matches(new) {
                return Ok(None);
            }
        }

        if let Some(from) = &trigger.from {
            match &old_value {
                Some(old) if from.matches(old) => {}
                _ => return Ok(None),
            }
        }
        if let Some(to) = &trigger.to {
            match &new_value {
                Some(new) if to.matches(new) => {}
                _ => return Ok(None),
            }
        }

        let data = TriggerData {
            id: trigger.id.clone(),
            entity_id: Some(entity_id.clone()),
            from_state: change.old_state.clone(),
            to_state: change.new_state.clone(),
            r#for: trigger.r#for,
            ..TriggerData::new("state")
        };

        debug!(entity_id, "state trigger matched");
        Ok(Some(with_hold(data, trigger.r#for, change.new_state)))
    }

    fn eval_device(
        &self,
        trigger: &DeviceTrigger,
        event: &Event,
    ) -> TriggerResult<Option<TriggerMatch>> {
        if event.event_type.as_str() != STATE_CHANGED {
            return Ok(None);
        }

        let resolved = self.device_triggers.resolve(trigger)?;

        let change: StateChangedData = serde_json::from_value(event.data.clone())
            .map_err(|e| TriggerError::InvalidConfig(format!("bad state_changed payload: {e}")))?;

        let entity_id = change.entity_id.as_str().to_string();
        if entity_id != resolved.entity_id {
            return Ok(None);
        }

        let old_value = change.old_state.as_ref().map(|s| s.state.as_str());
        let new_value = change.new_state.as_ref().map(|s| s.state.as_str());

        // Only transitions into the resolved state count.
        if old_value == new_value || new_value != Some(resolved.to_state.as_str()) {
            return Ok(None);
        }

        let data = TriggerData {
            id: trigger.id.clone(),
            entity_id: Some(entity_id.clone()),
            from_state: change.old_state.clone(),
            to_state: change.new_state.clone(),
            r#for: resolved.r#for,
            ..TriggerData::new("device")
        };

        debug!(
            entity_id,
            trigger_type = trigger.trigger_type,
            "device trigger matched"
        );
        Ok(Some(with_hold(data, resolved.r#for, change.new_state)))
    }

    fn eval_event(
        &self,
        trigger: &EventTrigger,
        event: &Event,
    ) -> TriggerResult<Option<TriggerMatch>> {
        if event.event_type.as_str() != trigger.event_type {
            return Ok(None);
        }

        if let Some(expected) = &trigger.event_data {
            if !json_matches(&event.data, expected) {
                return Ok(None);
            }
        }

        let data = TriggerData {
            id: trigger.id.clone(),
            event: Some(event.data.clone()),
            ..TriggerData::new("event")
        };

        debug!(event_type = trigger.event_type, "event trigger matched");
        Ok(Some(TriggerMatch::Fire(data)))
    }
}

/// Wrap a matched trigger into a hold when it carries a `for` duration.
///
/// A removal (no new state) cannot be held and fires immediately.
fn with_hold(
    data: TriggerData,
    duration: Option<Duration>,
    new_state: Option<haven_core::State>,
) -> TriggerMatch {
    match (duration, new_state) {
        (Some(duration), Some(new_state)) => TriggerMatch::Hold(PendingMatch {
            entity_id: new_state.entity_id.as_str().to_string(),
            expected_state: new_state.state.clone(),
            last_changed: new_state.last_changed,
            duration,
            data,
        }),
        _ => TriggerMatch::Fire(data),
    }
}

fn attr_value(state: Option<&haven_core::State>, attribute: &str) -> Option<String> {
    state
        .and_then(|s| s.attributes.get(attribute))
        .map(json_value_to_string)
}

fn json_value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Number(n) => n.to_string(),
        serde_json::Value::Bool(b) => b.to_string(),
        serde_json::Value::Null => "null".to_string(),
        _ => value.to_string(),
    }
}

/// Subset match: every key in `expected` must be present and equal in
/// `actual`; nested objects recurse, arrays compare exactly.
fn json_matches(actual: &serde_json::Value, expected: &serde_json::Value) -> bool {
    match (actual, expected) {
        (serde_json::Value::Object(actual), serde_json::Value::Object(expected)) => {
            expected.iter().all(|(key, expected_val)| {
                actual
                    .get(key)
                    .map(|actual_val| json_matches(actual_val, expected_val))
                    .unwrap_or(false)
            })
        }
        (serde_json::Value::Array(actual), serde_json::Value::Array(expected)) => {
            actual.len() == expected.len()
                && actual
                    .iter()
                    .zip(expected.iter())
                    .all(|(a, e)| json_matches(a, e))
        }
        _ => actual == expected,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceTriggerProvider, ResolvedDeviceTrigger};
    use crate::trigger::{EntityIdSpec, StateMatch};
    use haven_core::{Context, EntityId, State};
    use std::collections::HashMap;

    fn state(entity_id: &str, value: &str) -> State {
        let (domain, object_id) = entity_id.split_once('.').unwrap();
        State::new(
            EntityId::new(domain, object_id).unwrap(),
            value,
            HashMap::new(),
            Context::new(),
        )
    }

    fn change_event(entity_id: &str, old: Option<State>, new: Option<State>) -> Event {
        let data = StateChangedData {
            entity_id: {
                let (domain, object_id) = entity_id.split_once('.').unwrap();
                EntityId::new(domain, object_id).unwrap()
            },
            old_state: old,
            new_state: new,
        };
        Event::new(
            STATE_CHANGED,
            serde_json::to_value(&data).unwrap(),
            Context::new(),
        )
    }

    fn evaluator() -> TriggerEvaluator {
        TriggerEvaluator::new(Arc::new(DeviceTriggerRegistry::new()))
    }

    fn to_on(entity_id: &str) -> Trigger {
        Trigger::State(StateTrigger {
            id: None,
            entity_id: EntityIdSpec::Single(entity_id.to_string()),
            from: None,
            to: Some(StateMatch::Single("on".to_string())),
            not_from: None,
            not_to: None,
            attribute: None,
            r#for: None,
        })
    }

    #[test]
    fn to_match_fires_on_transition() {
        let eval = evaluator();
        let trigger = to_on("binary_sensor.hallway_motion");

        let event = change_event(
            "binary_sensor.hallway_motion",
            Some(state("binary_sensor.hallway_motion", "off")),
            Some(state("binary_sensor.hallway_motion", "on")),
        );

        let matched = eval.evaluate(&trigger, &event).unwrap().unwrap();
        let data = matched.data();
        assert_eq!(data.platform, "state");
        assert_eq!(data.entity_id.as_deref(), Some("binary_sensor.hallway_motion"));
        assert_eq!(data.from_state.as_ref().unwrap().state, "off");
        assert_eq!(data.to_state.as_ref().unwrap().state, "on");
        assert!(matches!(matched, TriggerMatch::Fire(_)));
    }

    #[test]
    fn same_value_write_does_not_fire() {
        let eval = evaluator();
        let trigger = to_on("binary_sensor.hallway_motion");

        let event = change_event(
            "binary_sensor.hallway_motion",
            Some(state("binary_sensor.hallway_motion", "on")),
            Some(state("binary_sensor.hallway_motion", "on")),
        );

        assert!(eval.evaluate(&trigger, &event).unwrap().is_none());
    }

    #[test]
    fn other_entities_are_ignored() {
        let eval = evaluator();
        let trigger = to_on("binary_sensor.hallway_motion");

        let event = change_event(
            "binary_sensor.porch_motion",
            Some(state("binary_sensor.porch_motion", "off")),
            Some(state("binary_sensor.porch_motion", "on")),
        );

        assert!(eval.evaluate(&trigger, &event).unwrap().is_none());
    }

    #[test]
    fn from_constraint() {
        let eval = evaluator();
        let trigger = Trigger::State(StateTrigger {
            id: None,
            entity_id: EntityIdSpec::Single("lock.front".to_string()),
            from: Some(StateMatch::Single("locked".to_string())),
            to: None,
            not_from: None,
            not_to: None,
            attribute: None,
            r#for: None,
        });

        let event = change_event(
            "lock.front",
            Some(state("lock.front", "locked")),
            Some(state("lock.front", "unlocked")),
        );
        assert!(eval.evaluate(&trigger, &event).unwrap().is_some());

        let event = change_event(
            "lock.front",
            Some(state("lock.front", "jammed")),
            Some(state("lock.front", "unlocked")),
        );
        assert!(eval.evaluate(&trigger, &event).unwrap().is_none());
    }

    #[test]
    fn not_to_filters_placeholder_states() {
        let eval = evaluator();
        let trigger = Trigger::State(StateTrigger {
            id: None,
            entity_id: EntityIdSpec::Single("sensor.kitchen_temp".to_string()),
            from: None,
            to: None,
            not_from: None,
            not_to: Some(StateMatch::List(vec![
                "unknown".to_string(),
                "unavailable".to_string(),
            ])),
            attribute: None,
            r#for: None,
        });

        let event = change_event(
            "sensor.kitchen_temp",
            Some(state("sensor.kitchen_temp", "21.0")),
            Some(state("sensor.kitchen_temp", "unavailable")),
        );
        assert!(eval.evaluate(&trigger, &event).unwrap().is_none());

        let event = change_event(
            "sensor.kitchen_temp",
            Some(state("sensor.kitchen_temp", "21.0")),
            Some(state("sensor.kitchen_temp", "21.5")),
        );
        assert!(eval.evaluate(&trigger, &event).unwrap().is_some());
    }

    #[test]
    fn any_change_fires_without_from_to() {
        let eval = evaluator();
        let trigger = Trigger::State(StateTrigger {
            id: Some("any".to_string()),
            entity_id: EntityIdSpec::Single("sensor.kitchen_temp".to_string()),
            from: None,
            to: None,
            not_from: None,
            not_to: None,
            attribute: None,
            r#for: None,
        });

        let event = change_event(
            "sensor.kitchen_temp",
            Some(state("sensor.kitchen_temp", "21.0")),
            Some(state("sensor.kitchen_temp", "21.5")),
        );
        let matched = eval.evaluate(&trigger, &event).unwrap().unwrap();
        assert_eq!(matched.data().id.as_deref(), Some("any"));
    }

    #[test]
    fn new_entity_fires_to_match() {
        let eval = evaluator();
        let trigger = to_on("binary_sensor.hallway_motion");

        let event = change_event(
            "binary_sensor.hallway_motion",
            None,
            Some(state("binary_sensor.hallway_motion", "on")),
        );
        assert!(eval.evaluate(&trigger, &event).unwrap().is_some());
    }

    #[test]
    fn attribute_trigger_watches_attribute() {
        let eval = evaluator();
        let trigger = Trigger::State(StateTrigger {
            id: None,
            entity_id: EntityIdSpec::Single("media_player.den".to_string()),
            from: None,
            to: Some(StateMatch::Single("net".to_string())),
            not_from: None,
            not_to: None,
            attribute: Some("source".to_string()),
            r#for: None,
        });

        let mut old = state("media_player.den", "playing");
        old.attributes
            .insert("source".to_string(), serde_json::json!("aux"));
        let mut new = state("media_player.den", "playing");
        new.attributes
            .insert("source".to_string(), serde_json::json!("net"));

        let event = change_event("media_player.den", Some(old), Some(new));
        assert!(eval.evaluate(&trigger, &event).unwrap().is_some());
    }

    #[test]
    fn for_duration_returns_hold() {
        let eval = evaluator();
        let trigger = Trigger::State(StateTrigger {
            id: None,
            entity_id: EntityIdSpec::Single("binary_sensor.hallway_motion".to_string()),
            from: None,
            to: Some(StateMatch::Single("on".to_string())),
            not_from: None,
            not_to: None,
            attribute: None,
            r#for: Some(Duration::from_secs(30)),
        });

        let new = state("binary_sensor.hallway_motion", "on");
        let expected_changed = new.last_changed;
        let event = change_event(
            "binary_sensor.hallway_motion",
            Some(state("binary_sensor.hallway_motion", "off")),
            Some(new),
        );

        let matched = eval.evaluate(&trigger, &event).unwrap().unwrap();
        let TriggerMatch::Hold(pending) = matched else {
            panic!("expected hold");
        };
        assert_eq!(pending.entity_id, "binary_sensor.hallway_motion");
        assert_eq!(pending.expected_state, "on");
        assert_eq!(pending.duration, Duration::from_secs(30));
        assert_eq!(pending.last_changed, expected_changed);
        assert_eq!(pending.data.r#for, Some(Duration::from_secs(30)));
    }

    #[test]
    fn non_state_events_are_ignored_by_state_triggers() {
        let eval = evaluator();
        let trigger = to_on("binary_sensor.hallway_motion");

        let event = Event::new("panel_button", serde_json::json!({}), Context::new());
        assert!(eval.evaluate(&trigger, &event).unwrap().is_none());
    }

    #[test]
    fn event_trigger_subset_matching() {
        let eval = evaluator();
        let trigger = Trigger::Event(EventTrigger {
            id: None,
            event_type: "panel_button".to_string(),
            event_data: Some(serde_json::json!({"button": 3})),
        });

        let event = Event::new(
            "panel_button",
            serde_json::json!({"button": 3, "pressed_at": "eventually"}),
            Context::new(),
        );
        let matched = eval.evaluate(&trigger, &event).unwrap().unwrap();
        assert_eq!(matched.data().platform, "event");
        assert!(matched.data().event.is_some());

        let event = Event::new(
            "panel_button",
            serde_json::json!({"button": 4}),
            Context::new(),
        );
        assert!(eval.evaluate(&trigger, &event).unwrap().is_none());
    }

    struct LeakProvider;

    impl DeviceTriggerProvider for LeakProvider {
        fn domain(&self) -> &str {
            "binary_sensor"
        }

        fn triggers_for_device(&self, _device_id: &str) -> Vec<DeviceTrigger> {
            Vec::new()
        }

        fn resolve(&self, trigger: &DeviceTrigger) -> TriggerResult<ResolvedDeviceTrigger> {
            let to_state = match trigger.trigger_type.as_str() {
                "moist" => "on",
                "not_moist" => "off",
                other => {
                    return Err(TriggerError::UnknownTriggerType {
                        entity_id: trigger.entity_id.clone(),
                        trigger_type: other.to_string(),
                    })
                }
            };
            Ok(ResolvedDeviceTrigger {
                entity_id: trigger.entity_id.clone(),
                to_state: to_state.to_string(),
                r#for: trigger.r#for,
            })
        }
    }

    fn leak_trigger(trigger_type: &str) -> Trigger {
        Trigger::Device(DeviceTrigger {
            id: None,
            domain: "binary_sensor".to_string(),
            device_id: "dev-1".to_string(),
            entity_id: "binary_sensor.cellar_leak".to_string(),
            trigger_type: trigger_type.to_string(),
            r#for: None,
        })
    }

    #[test]
    fn device_trigger_fires_on_resolved_transition() {
        let registry = Arc::new(DeviceTriggerRegistry::new());
        registry.register(Arc::new(LeakProvider));
        let eval = TriggerEvaluator::new(registry);

        let event = change_event(
            "binary_sensor.cellar_leak",
            Some(state("binary_sensor.cellar_leak", "off")),
            Some(state("binary_sensor.cellar_leak", "on")),
        );

        let matched = eval.evaluate(&leak_trigger("moist"), &event).unwrap().unwrap();
        assert_eq!(matched.data().platform, "device");
        assert_eq!(
            matched.data().entity_id.as_deref(),
            Some("binary_sensor.cellar_leak")
        );

        // The opposite type does not match this transition.
        assert!(eval
            .evaluate(&leak_trigger("not_moist"), &event)
            .unwrap()
            .is_none());
    }

    #[test]
    fn device_trigger_unknown_type_errors() {
        let registry = Arc::new(DeviceTriggerRegistry::new());
        registry.register(Arc::new(LeakProvider));
        let eval = TriggerEvaluator::new(registry);

        let event = change_event(
            "binary_sensor.cellar_leak",
            Some(state("binary_sensor.cellar_leak", "off")),
            Some(state("binary_sensor.cellar_leak", "on")),
        );

        assert!(eval.evaluate(&leak_trigger("soggy"), &event).is_err());
    }
}

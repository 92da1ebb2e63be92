//! Entity state access for templates
//!
//! Exposes the state machine to templates as the `states` object:
//! `states('binary_sensor.front_door')` returns the state value,
//! `states.binary_sensor.front_door` the full state object, and
//! `states.binary_sensor` a domain proxy.

use haven_core::State;
use haven_state_machine::StateMachine;
use minijinja::value::{Object, ObjectRepr, Value};
use minijinja::{Error, ErrorKind};
use std::collections::HashMap;
use std::convert::TryFrom;
use std::sync::Arc;

fn value_to_f64(value: &Value) -> Option<f64> {
    f64::try_from(value.clone())
        .ok()
        .or_else(|| value.as_i64().map(|i| i as f64))
}

/// Root `states` object registered as a template global.
#[derive(Clone)]
pub struct StatesObject {
    state_machine: Arc<StateMachine>,
}

impl std::fmt::Debug for StatesObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatesObject").finish_non_exhaustive()
    }
}

impl StatesObject {
    pub fn new(state_machine: Arc<StateMachine>) -> Self {
        Self { state_machine }
    }

    /// State value as a string, if the entity exists.
    pub fn get_state(&self, entity_id: &str) -> Option<String> {
        self.state_machine.get_state(entity_id)
    }

    /// Full state snapshot for an entity.
    pub fn get(&self, entity_id: &str) -> Option<State> {
        self.state_machine.get(entity_id)
    }

    pub fn is_state(&self, entity_id: &str, state: &str) -> bool {
        self.state_machine.is_state(entity_id, state)
    }

    /// True when the entity matches any of the given state values.
    pub fn is_state_any(&self, entity_id: &str, states: &[&str]) -> bool {
        match self.get_state(entity_id) {
            Some(current) => states.iter().any(|s| *s == current),
            None => false,
        }
    }

    /// Attribute value for an entity, `UNDEFINED` when absent.
    pub fn state_attr(&self, entity_id: &str, attribute: &str) -> Value {
        self.state_machine
            .get(entity_id)
            .and_then(|s| s.attributes.get(attribute).map(json_to_value))
            .unwrap_or(Value::UNDEFINED)
    }

    pub fn is_state_attr(&self, entity_id: &str, attribute: &str, value: Value) -> bool {
        values_equal(&self.state_attr(entity_id, attribute), &value)
    }

    /// True when the entity exists and is neither unknown nor unavailable.
    pub fn has_value(&self, entity_id: &str) -> bool {
        match self.state_machine.get(entity_id) {
            Some(state) => !state.is_unavailable() && !state.is_unknown(),
            None => false,
        }
    }
}

impl Object for StatesObject {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let key = key.as_str()?;

        // A key with a dot is a full entity id, anything else a domain.
        if key.contains('.') {
            return self.get(key).map(wrap_state);
        }

        Some(Value::from_object(DomainProxy {
            domain: key.to_string(),
            state_machine: self.state_machine.clone(),
        }))
    }

    fn call(self: &Arc<Self>, _state: &minijinja::State, args: &[Value]) -> Result<Value, Error> {
        let entity_id = args.first().and_then(|v| v.as_str()).ok_or_else(|| {
            Error::new(ErrorKind::InvalidOperation, "states() requires an entity id")
        })?;

        Ok(self
            .get_state(entity_id)
            .map(Value::from)
            .unwrap_or(Value::UNDEFINED))
    }
}

/// Second hop of `states.<domain>.<object_id>`.
struct DomainProxy {
    domain: String,
    state_machine: Arc<StateMachine>,
}

impl std::fmt::Debug for DomainProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DomainProxy")
            .field("domain", &self.domain)
            .finish_non_exhaustive()
    }
}

impl Object for DomainProxy {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let object_id = key.as_str()?;
        let entity_id = format!("{}.{}", self.domain, object_id);
        self.state_machine.get(&entity_id).map(wrap_state)
    }

    fn call(self: &Arc<Self>, _state: &minijinja::State, _args: &[Value]) -> Result<Value, Error> {
        // states.binary_sensor() lists every state in the domain.
        let entities: Vec<Value> = self
            .state_machine
            .domain_states(&self.domain)
            .into_iter()
            .map(wrap_state)
            .collect();

        Ok(Value::from(entities))
    }
}

fn wrap_state(state: State) -> Value {
    Value::from_object(StateWrapper(state))
}

/// State snapshot exposed to templates.
///
/// Renders as the bare state value but exposes `entity_id`, `name`,
/// `last_changed` and friends as fields. Unknown keys fall through to the
/// attribute map, so `states.light.porch.brightness` works.
#[derive(Debug, Clone)]
pub struct StateWrapper(pub State);

impl std::fmt::Display for StateWrapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.state)
    }
}

impl Object for StateWrapper {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }

    fn render(self: &Arc<Self>, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.state)
    }

    fn get_value(self: &Arc<Self>, key: &Value) -> Option<Value> {
        let key = key.as_str()?;
        match key {
            "state" => Some(Value::from(self.0.state.as_str())),
            "entity_id" => Some(Value::from(self.0.entity_id.as_str())),
            "domain" => Some(Value::from(self.0.entity_id.domain())),
            "object_id" => Some(Value::from(self.0.entity_id.object_id())),
            "name" => self
                .0
                .attributes
                .get("friendly_name")
                .and_then(|v| v.as_str().map(Value::from))
                .or_else(|| Some(Value::from(self.0.entity_id.object_id()))),
            "last_changed" => Some(Value::from(self.0.last_changed.to_rfc3339())),
            "last_updated" => Some(Value::from(self.0.last_updated.to_rfc3339())),
            "attributes" => {
                let attrs: HashMap<String, Value> = self
                    .0
                    .attributes
                    .iter()
                    .map(|(k, v)| (k.clone(), json_to_value(v)))
                    .collect();
                Some(Value::from_object(attrs))
            }
            _ => self.0.attributes.get(key).map(json_to_value),
        }
    }
}

/// Convert a JSON value into a template value.
pub(crate) fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::from(()),
        serde_json::Value::Bool(b) => Value::from(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(f) = n.as_f64() {
                Value::from(f)
            } else {
                Value::from(n.to_string())
            }
        }
        serde_json::Value::String(s) => Value::from(s.as_str()),
        serde_json::Value::Array(arr) => {
            Value::from(arr.iter().map(json_to_value).collect::<Vec<_>>())
        }
        serde_json::Value::Object(obj) => {
            let map: std::collections::BTreeMap<String, Value> =
                obj.iter().map(|(k, v)| (k.clone(), json_to_value(v))).collect();
            Value::from_object(map)
        }
    }
}

/// Loose equality for attribute comparison: strings, numbers and bools
/// compare within their own kind.
fn values_equal(a: &Value, b: &Value) -> bool {
    if a.is_undefined() && b.is_undefined() {
        return true;
    }
    if a.is_none() && b.is_none() {
        return true;
    }

    if let (Some(a_str), Some(b_str)) = (a.as_str(), b.as_str()) {
        return a_str == b_str;
    }

    if let (Some(a_num), Some(b_num)) = (value_to_f64(a), value_to_f64(b)) {
        return (a_num - b_num).abs() < f64::EPSILON;
    }

    if let (Ok(a_bool), Ok(b_bool)) = (bool::try_from(a.clone()), bool::try_from(b.clone())) {
        return a_bool == b_bool;
    }

    false
}

/// `is_state('light.porch', 'on')`, also accepting a list of states.
pub fn is_state_fn(states: Arc<StatesObject>, entity_id: &str, state: Value) -> bool {
    // Strings are iterable in minijinja, so check for one first.
    if let Some(s) = state.as_str() {
        states.is_state(entity_id, s)
    } else if let Ok(iter) = state.try_iter() {
        let wanted: Vec<String> = iter
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        let refs: Vec<&str> = wanted.iter().map(String::as_str).collect();
        states.is_state_any(entity_id, &refs)
    } else {
        false
    }
}

pub fn state_attr_fn(states: Arc<StatesObject>, entity_id: &str, attribute: &str) -> Value {
    states.state_attr(entity_id, attribute)
}

pub fn is_state_attr_fn(
    states: Arc<StatesObject>,
    entity_id: &str,
    attribute: &str,
    value: Value,
) -> bool {
    states.is_state_attr(entity_id, attribute, value)
}

pub fn has_value_fn(states: Arc<StatesObject>, entity_id: &str) -> bool {
    states.has_value(entity_id)
}

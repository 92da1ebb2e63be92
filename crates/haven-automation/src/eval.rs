//! Condition evaluation logic
//!
//! Conditions are evaluated at trigger time against the current state of the
//! hub, with the firing trigger's data exposed to templates.

use haven_state_machine::StateMachine;
use haven_template::TemplateEngine;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, trace};

use crate::condition::{
    AndCondition, Condition, ConditionError, ConditionResult, NotCondition, OrCondition,
    StateCondition, TemplateCondition,
};
use crate::trigger::{StateMatch, TriggerData};

/// Context for condition evaluation
#[derive(Debug, Clone, Default)]
pub struct EvalContext {
    /// The trigger that fired (if any)
    pub trigger: Option<TriggerData>,

    /// Additional variables available to templates
    pub variables: HashMap<String, serde_json::Value>,
}

impl EvalContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_trigger(trigger: TriggerData) -> Self {
        Self {
            trigger: Some(trigger),
            ..Default::default()
        }
    }

    pub fn with_var(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.variables.insert(key.into(), value);
        self
    }

    /// Flatten into the variable map handed to the template engine.
    pub fn to_template_context(&self) -> serde_json::Value {
        let mut ctx = serde_json::Map::new();

        if let Some(trigger) = &self.trigger {
            ctx.insert(
                "trigger".to_string(),
                serde_json::to_value(trigger).unwrap_or(serde_json::Value::Null),
            );
        }

        for (k, v) in &self.variables {
            ctx.insert(k.clone(), v.clone());
        }

        serde_json::Value::Object(ctx)
    }
}

/// Condition evaluator
///
/// Reads entity state through the state machine and renders template
/// conditions through the shared engine.
pub struct ConditionEvaluator {
    state_machine: Arc<StateMachine>,
    template_engine: Arc<TemplateEngine>,
}

impl ConditionEvaluator {
    pub fn new(
        state_machine: Arc<StateMachine>,
        template_engine: Arc<TemplateEngine>,
    ) -> Self {
        Self {
            state_machine,
            template_engine,
        }
    }

    /// Evaluate a single condition.
    pub fn evaluate(&self, condition: &Condition, ctx: &EvalContext) -> ConditionResult<bool> {
        match condition {
            Condition::State(c) => self.eval_state(c),
            Condition::Template(c) => self.eval_template(c, ctx),
            Condition::And(c) => self.eval_and(c, ctx),
            Condition::Or(c) => self.eval_or(c, ctx),
            Condition::Not(c) => self.eval_not(c, ctx),
        }
    }

    /// Evaluate a list of conditions; all must pass.
    pub fn evaluate_all(
        &self,
        conditions: &[Condition],
        ctx: &EvalContext,
    ) -> ConditionResult<bool> {
        for condition in conditions {
            if !self.evaluate(condition, ctx)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Evaluate a list of conditions; any passing is enough.
    pub fn evaluate_any(
        &self,
        conditions: &[Condition],
        ctx: &EvalContext,
    ) -> ConditionResult<bool> {
        for condition in conditions {
            if self.evaluate(condition, ctx)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn eval_state(&self, condition: &StateCondition) -> ConditionResult<bool> {
        let entity_ids = condition.entity_id.ids();
        debug!(
            ?entity_ids,
            state = ?condition.state,
            attribute = ?condition.attribute,
            "evaluating state condition"
        );

        for entity_id in entity_ids {
            let value = if let Some(attr) = &condition.attribute {
                self.get_attribute_value(entity_id, attr)?
            } else {
                self.state_machine
                    .get_state(entity_id)
                    .ok_or_else(|| ConditionError::EntityNotFound(entity_id.to_string()))?
            };

            let matches = if condition.match_regex {
                matches_regex(&value, &condition.state)?
            } else {
                condition.state.matches(&value)
            };

            trace!(entity_id, value, matches, "state check");

            if !matches {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn eval_template(
        &self,
        condition: &TemplateCondition,
        ctx: &EvalContext,
    ) -> ConditionResult<bool> {
        let template_ctx = ctx.to_template_context();
        let result = self
            .template_engine
            .render_with_context(&condition.value_template, &template_ctx)
            .map_err(|e| ConditionError::Template(e.to_string()))?;

        let is_true = is_truthy(&result);
        trace!(result, is_true, "template condition");
        Ok(is_true)
    }

    fn eval_and(&self, condition: &AndCondition, ctx: &EvalContext) -> ConditionResult<bool> {
        self.evaluate_all(&condition.conditions, ctx)
    }

    fn eval_or(&self, condition: &OrCondition, ctx: &EvalContext) -> ConditionResult<bool> {
        self.evaluate_any(&condition.conditions, ctx)
    }

    fn eval_not(&self, condition: &NotCondition, ctx: &EvalContext) -> ConditionResult<bool> {
        Ok(!self.evaluate_any(&condition.conditions, ctx)?)
    }

    fn get_attribute_value(&self, entity_id: &str, attribute: &str) -> ConditionResult<String> {
        let state = self
            .state_machine
            .get(entity_id)
            .ok_or_else(|| ConditionError::EntityNotFound(entity_id.to_string()))?;

        let value = state.attributes.get(attribute).ok_or_else(|| {
            ConditionError::InvalidState(format!(
                "entity {} missing attribute {}",
                entity_id, attribute
            ))
        })?;

        Ok(json_value_to_string(value))
    }
}

fn matches_regex(value: &str, pattern: &StateMatch) -> ConditionResult<bool> {
    let patterns = match pattern {
        StateMatch::Single(p) => vec![p.as_str()],
        StateMatch::List(ps) => ps.iter().map(|s| s.as_str()).collect(),
    };

    for pattern in patterns {
        let re = Regex::new(pattern)
            .map_err(|e| ConditionError::InvalidConfig(format!("invalid regex: {e}")))?;

        if re.is_match(value) {
            return Ok(true);
        }
    }

    Ok(false)
}

/// Truthiness of rendered template output.
///
/// Empty output and the usual negative words are false, anything else true.
pub(crate) fn is_truthy(value: &str) -> bool {
    let trimmed = value.trim().to_lowercase();
    if trimmed.is_empty() {
        return false;
    }
    !matches!(trimmed.as_str(), "false" | "no" | "off" | "0" | "none")
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::StateCondition;
    use crate::trigger::EntityIdSpec;
    use haven_core::{Context, EntityId};
    use haven_event_bus::EventBus;

    fn make_evaluator() -> (ConditionEvaluator, Arc<StateMachine>) {
        let bus = Arc::new(EventBus::new());
        let state_machine = Arc::new(StateMachine::new(bus));
        let template_engine = Arc::new(TemplateEngine::new(state_machine.clone()));
        let evaluator = ConditionEvaluator::new(state_machine.clone(), template_engine);
        (evaluator, state_machine)
    }

    fn set_state(
        sm: &StateMachine,
        entity_id: &str,
        state: &str,
        attrs: HashMap<String, serde_json::Value>,
    ) {
        let (domain, object_id) = entity_id.split_once('.').unwrap();
        let eid = EntityId::new(domain, object_id).unwrap();
        sm.set(eid, state, attrs, Context::new());
    }

    fn state_condition(entity_id: &str, state: &str) -> Condition {
        Condition::State(StateCondition {
            entity_id: EntityIdSpec::Single(entity_id.to_string()),
            state: StateMatch::Single(state.to_string()),
            attribute: None,
            match_regex: false,
        })
    }

    #[test]
    fn state_condition_simple() {
        let (evaluator, sm) = make_evaluator();
        set_state(&sm, "binary_sensor.front_door", "off", HashMap::new());

        let ctx = EvalContext::new();
        assert!(evaluator
            .evaluate(&state_condition("binary_sensor.front_door", "off"), &ctx)
            .unwrap());
        assert!(!evaluator
            .evaluate(&state_condition("binary_sensor.front_door", "on"), &ctx)
            .unwrap());
    }

    #[test]
    fn state_condition_list_of_entities() {
        let (evaluator, sm) = make_evaluator();
        set_state(&sm, "lock.front", "locked", HashMap::new());
        set_state(&sm, "lock.back", "locked", HashMap::new());

        let condition = Condition::State(StateCondition {
            entity_id: EntityIdSpec::List(vec![
                "lock.front".to_string(),
                "lock.back".to_string(),
            ]),
            state: StateMatch::Single("locked".to_string()),
            attribute: None,
            match_regex: false,
        });

        let ctx = EvalContext::new();
        assert!(evaluator.evaluate(&condition, &ctx).unwrap());

        set_state(&sm, "lock.back", "unlocked", HashMap::new());
        assert!(!evaluator.evaluate(&condition, &ctx).unwrap());
    }

    #[test]
    fn state_condition_attribute() {
        let (evaluator, sm) = make_evaluator();
        set_state(
            &sm,
            "media_player.den",
            "playing",
            HashMap::from([("source".to_string(), serde_json::json!("aux"))]),
        );

        let condition = Condition::State(StateCondition {
            entity_id: EntityIdSpec::Single("media_player.den".to_string()),
            state: StateMatch::Single("aux".to_string()),
            attribute: Some("source".to_string()),
            match_regex: false,
        });

        let ctx = EvalContext::new();
        assert!(evaluator.evaluate(&condition, &ctx).unwrap());
    }

    #[test]
    fn state_condition_regex() {
        let (evaluator, sm) = make_evaluator();
        set_state(&sm, "sensor.sync_status", "running_fast", HashMap::new());

        let condition = Condition::State(StateCondition {
            entity_id: EntityIdSpec::Single("sensor.sync_status".to_string()),
            state: StateMatch::Single("running.*".to_string()),
            attribute: None,
            match_regex: true,
        });

        let ctx = EvalContext::new();
        assert!(evaluator.evaluate(&condition, &ctx).unwrap());
    }

    #[test]
    fn missing_entity_is_an_error() {
        let (evaluator, _sm) = make_evaluator();

        let ctx = EvalContext::new();
        let result = evaluator.evaluate(&state_condition("sensor.ghost", "on"), &ctx);
        assert!(matches!(result, Err(ConditionError::EntityNotFound(_))));
    }

    #[test]
    fn template_condition_sees_trigger_data() {
        let (evaluator, sm) = make_evaluator();
        set_state(&sm, "binary_sensor.front_door", "on", HashMap::new());

        let condition = Condition::Template(TemplateCondition {
            value_template: "{{ trigger.platform == 'state' }}".to_string(),
        });

        let ctx = EvalContext::with_trigger(TriggerData::new("state"));
        assert!(evaluator.evaluate(&condition, &ctx).unwrap());

        let ctx = EvalContext::with_trigger(TriggerData::new("event"));
        assert!(!evaluator.evaluate(&condition, &ctx).unwrap());
    }

    #[test]
    fn template_condition_reads_states() {
        let (evaluator, sm) = make_evaluator();
        set_state(&sm, "sensor.kitchen_temp", "26.2", HashMap::new());

        let condition = Condition::Template(TemplateCondition {
            value_template: "{{ states('sensor.kitchen_temp') | float > 25 }}".to_string(),
        });

        let ctx = EvalContext::new();
        assert!(evaluator.evaluate(&condition, &ctx).unwrap());

        set_state(&sm, "sensor.kitchen_temp", "19.1", HashMap::new());
        assert!(!evaluator.evaluate(&condition, &ctx).unwrap());
    }

    #[test]
    fn and_or_not_combinators() {
        let (evaluator, sm) = make_evaluator();
        set_state(&sm, "light.one", "on", HashMap::new());
        set_state(&sm, "light.two", "off", HashMap::new());

        let ctx = EvalContext::new();

        let and = Condition::and(vec![
            state_condition("light.one", "on"),
            state_condition("light.two", "off"),
        ]);
        assert!(evaluator.evaluate(&and, &ctx).unwrap());

        let or = Condition::or(vec![
            state_condition("light.one", "off"),
            state_condition("light.two", "off"),
        ]);
        assert!(evaluator.evaluate(&or, &ctx).unwrap());

        let not = Condition::not(state_condition("light.one", "off"));
        assert!(evaluator.evaluate(&not, &ctx).unwrap());

        let not = Condition::not(state_condition("light.one", "on"));
        assert!(!evaluator.evaluate(&not, &ctx).unwrap());
    }

    #[test]
    fn evaluate_all_short_circuits() {
        let (evaluator, sm) = make_evaluator();
        set_state(&sm, "light.one", "off", HashMap::new());

        // The second condition references a missing entity; failure of the
        // first short-circuits before it is reached.
        let conditions = vec![
            state_condition("light.one", "on"),
            state_condition("sensor.ghost", "on"),
        ];

        let ctx = EvalContext::new();
        assert!(!evaluator.evaluate_all(&conditions, &ctx).unwrap());
    }

    #[test]
    fn truthiness_rules() {
        assert!(is_truthy("true"));
        assert!(is_truthy("True"));
        assert!(is_truthy("yes"));
        assert!(is_truthy("hello"));
        assert!(is_truthy("1"));

        assert!(!is_truthy("false"));
        assert!(!is_truthy("no"));
        assert!(!is_truthy("off"));
        assert!(!is_truthy("0"));
        assert!(!is_truthy("none"));
        assert!(!is_truthy(""));
        assert!(!is_truthy("   "));
    }

    #[test]
    fn eval_context_template_vars() {
        let trigger = TriggerData {
            id: Some("door_opened".to_string()),
            ..TriggerData::new("state")
        };

        let ctx =
            EvalContext::with_trigger(trigger).with_var("greeting", serde_json::json!("hello"));
        let vars = ctx.to_template_context();

        assert_eq!(vars["trigger"]["platform"], "state");
        assert_eq!(vars["trigger"]["id"], "door_opened");
        assert_eq!(vars["greeting"], "hello");
    }
}

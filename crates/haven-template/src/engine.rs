//! Template engine with hub extensions
//!
//! Wraps a minijinja environment so automations and scripts can reference
//! live entity state in Jinja2 syntax.

use crate::error::TemplateResult;
use crate::filters;
use crate::globals;
use crate::states::{self, StatesObject};
use haven_state_machine::StateMachine;
use minijinja::{Environment, Value};
use std::sync::Arc;
use tracing::debug;

/// Template engine bound to the hub's state machine.
///
/// Extensions on top of plain Jinja2:
/// - the `states` object and `states('entity_id')` lookups
/// - `is_state()`, `state_attr()`, `has_value()`
/// - `now()`, `utcnow()`, `iif()`
/// - filters `round`, `float`, `int`, `bool`, `slugify`, `regex_replace`,
///   `to_json`, `from_json`
pub struct TemplateEngine {
    env: Environment<'static>,
    states: Arc<StatesObject>,
}

impl TemplateEngine {
    pub fn new(state_machine: Arc<StateMachine>) -> Self {
        let states = Arc::new(StatesObject::new(state_machine));
        let mut env = Environment::new();
        env.set_debug(true);

        Self::register_filters(&mut env);
        Self::register_globals(&mut env, states.clone());

        Self { env, states }
    }

    fn register_filters(env: &mut Environment<'static>) {
        // Strings
        env.add_filter("slugify", filters::slugify);
        env.add_filter("regex_replace", filters::regex_replace);

        // Type conversion
        env.add_filter("float", filters::to_float);
        env.add_filter("int", filters::to_int);
        env.add_filter("bool", filters::to_bool);

        // Math
        env.add_filter("round", filters::round_filter);

        // JSON
        env.add_filter("to_json", filters::to_json);
        env.add_filter("from_json", filters::from_json);
    }

    fn register_globals(env: &mut Environment<'static>, states: Arc<StatesObject>) {
        env.add_global("states", Value::from_object((*states).clone()));

        // Time
        env.add_function("now", globals::now);
        env.add_function("utcnow", globals::utcnow);

        // State queries close over the shared states object.
        let for_is_state = states.clone();
        env.add_function("is_state", move |entity_id: &str, state: Value| {
            states::is_state_fn(for_is_state.clone(), entity_id, state)
        });

        let for_state_attr = states.clone();
        env.add_function("state_attr", move |entity_id: &str, attribute: &str| {
            states::state_attr_fn(for_state_attr.clone(), entity_id, attribute)
        });

        let for_is_state_attr = states.clone();
        env.add_function(
            "is_state_attr",
            move |entity_id: &str, attribute: &str, value: Value| {
                states::is_state_attr_fn(for_is_state_attr.clone(), entity_id, attribute, value)
            },
        );

        let for_has_value = states;
        env.add_function("has_value", move |entity_id: &str| {
            states::has_value_fn(for_has_value.clone(), entity_id)
        });

        env.add_function("iif", globals::iif);
    }

    /// Render a template string against the current hub state.
    pub fn render(&self, template: &str) -> TemplateResult<String> {
        debug!(template, "rendering template");

        let tmpl = self.env.template_from_str(template)?;
        Ok(tmpl.render(())?)
    }

    /// Render with extra context variables layered over the globals.
    pub fn render_with_context(
        &self,
        template: &str,
        context: impl serde::Serialize,
    ) -> TemplateResult<String> {
        let tmpl = self.env.template_from_str(template)?;
        Ok(tmpl.render(context)?)
    }

    /// Evaluate an expression and return the typed value.
    pub fn evaluate(&self, expression: &str) -> TemplateResult<Value> {
        let expr = self.env.compile_expression(expression)?;
        Ok(expr.eval(())?)
    }

    /// Evaluate an expression with extra context variables.
    pub fn evaluate_with_context(
        &self,
        expression: &str,
        context: impl serde::Serialize,
    ) -> TemplateResult<Value> {
        let expr = self.env.compile_expression(expression)?;
        Ok(expr.eval(context)?)
    }

    /// Whether a string contains template syntax at all.
    ///
    /// Lets config loaders walk nested service data and only render the
    /// strings that need it.
    pub fn is_template(template: &str) -> bool {
        template.contains("{{") || template.contains("{%") || template.contains("{#")
    }

    pub fn states(&self) -> &StatesObject {
        &self.states
    }
}

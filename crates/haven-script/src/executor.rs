//! Script executor
//!
//! Runs action sequences against the live hub: service calls go through the
//! registry, events through the bus, and every string value in action data
//! is rendered as a template first.

use crate::action::{Action, DelaySpec};
use haven_automation::TriggerData;
use haven_core::Context;
use haven_event_bus::EventBus;
use haven_service_registry::ServiceRegistry;
use haven_template::TemplateEngine;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, trace};

/// Script execution errors
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("invalid action: {0}")]
    InvalidAction(String),

    #[error("service call failed: {0}")]
    ServiceCall(String),

    #[error("template error: {0}")]
    Template(String),
}

/// Result type for script execution
pub type ScriptResult<T> = Result<T, ScriptError>;

/// Execution context for one script run.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// Variables available to templates
    pub variables: HashMap<String, Value>,

    /// Trigger data when started by an automation
    pub trigger: Option<TriggerData>,

    /// Causality context stamped on every call and event
    pub context: Context,

    /// Response of the last service call that stored one
    pub response: Option<Value>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        Self {
            variables: HashMap::new(),
            trigger: None,
            context: Context::new(),
            response: None,
        }
    }

    pub fn with_trigger(trigger: TriggerData) -> Self {
        Self {
            trigger: Some(trigger),
            ..Self::new()
        }
    }

    /// Use a specific causality context instead of a fresh root.
    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    pub fn set_var(&mut self, key: impl Into<String>, value: Value) {
        self.variables.insert(key.into(), value);
    }

    pub fn get_var(&self, key: &str) -> Option<&Value> {
        self.variables.get(key)
    }

    /// Variable map handed to the template engine; the trigger rides along
    /// under `trigger`.
    pub fn to_template_vars(&self) -> Value {
        let mut vars = serde_json::Map::new();

        for (k, v) in &self.variables {
            vars.insert(k.clone(), v.clone());
        }

        if let Some(trigger) = &self.trigger {
            vars.insert(
                "trigger".to_string(),
                serde_json::to_value(trigger).unwrap_or(Value::Null),
            );
        }

        Value::Object(vars)
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Executes action sequences.
pub struct ScriptExecutor {
    service_registry: Arc<ServiceRegistry>,
    template_engine: Arc<TemplateEngine>,
    event_bus: Arc<EventBus>,
}

impl ScriptExecutor {
    pub fn new(
        service_registry: Arc<ServiceRegistry>,
        template_engine: Arc<TemplateEngine>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        Self {
            service_registry,
            template_engine,
            event_bus,
        }
    }

    /// Execute a sequence of raw action values in order.
    ///
    /// Returns the stored response of the last service call that requested
    /// one, if any. A failing step aborts the rest of the sequence.
    pub async fn execute(
        &self,
        actions: &[Value],
        ctx: &mut ExecutionContext,
    ) -> ScriptResult<Option<Value>> {
        debug!(count = actions.len(), "executing actions");

        for (i, action_value) in actions.iter().enumerate() {
            trace!(index = i, "executing action");

            let action: Action = serde_json::from_value(action_value.clone())
                .map_err(|e| ScriptError::InvalidAction(e.to_string()))?;

            self.execute_action(&action, ctx).await?;
        }

        Ok(ctx.response.clone())
    }

    async fn execute_action(&self, action: &Action, ctx: &mut ExecutionContext) -> ScriptResult<()> {
        match action {
            Action::Service(service) => {
                if service.enabled {
                    self.execute_service(service, ctx).await?;
                }
            }
            Action::Delay(delay) => {
                if delay.enabled {
                    self.execute_delay(delay, ctx).await?;
                }
            }
            Action::Event(event) => {
                if event.enabled {
                    self.execute_event(event, ctx)?;
                }
            }
            Action::Variables(vars) => {
                if vars.enabled {
                    self.execute_variables(vars, ctx)?;
                }
            }
        }
        Ok(())
    }

    async fn execute_service(
        &self,
        service: &crate::action::ServiceAction,
        ctx: &mut ExecutionContext,
    ) -> ScriptResult<()> {
        let (domain, svc_name) = service.service.split_once('.').ok_or_else(|| {
            ScriptError::InvalidAction(format!("invalid service format: {}", service.service))
        })?;

        let template_ctx = ctx.to_template_vars();
        let mut service_data = serde_json::Map::new();

        for (key, value) in &service.data {
            service_data.insert(key.clone(), self.render_value(value, &template_ctx)?);
        }

        // Targets fold into the service data the handler sees.
        if let Some(target) = &service.target {
            if !target.entity_id.is_empty() {
                service_data.insert(
                    "entity_id".to_string(),
                    serde_json::to_value(&target.entity_id)
                        .map_err(|e| ScriptError::InvalidAction(e.to_string()))?,
                );
            }
            if !target.device_id.is_empty() {
                service_data.insert(
                    "device_id".to_string(),
                    serde_json::to_value(&target.device_id)
                        .map_err(|e| ScriptError::InvalidAction(e.to_string()))?,
                );
            }
        }

        debug!(domain, service = svc_name, "calling service");

        let return_response = service.response_variable.is_some();
        let result = self
            .service_registry
            .call(
                domain,
                svc_name,
                Value::Object(service_data),
                ctx.context.clone(),
                return_response,
            )
            .await
            .map_err(|e| ScriptError::ServiceCall(e.to_string()))?;

        if let Some(var_name) = &service.response_variable {
            if let Some(response) = result {
                ctx.set_var(var_name.clone(), response.clone());
                ctx.response = Some(response);
            }
        }

        Ok(())
    }

    async fn execute_delay(
        &self,
        delay: &crate::action::DelayAction,
        ctx: &mut ExecutionContext,
    ) -> ScriptResult<()> {
        let duration = match delay.delay.to_duration() {
            Some(duration) => duration,
            None => {
                let DelaySpec::Text(text) = &delay.delay else {
                    unreachable!("only text delays lack a fixed duration");
                };
                let rendered = self
                    .template_engine
                    .render_with_context(text, &ctx.to_template_vars())
                    .map_err(|e| ScriptError::Template(e.to_string()))?;
                parse_duration(&rendered).ok_or_else(|| {
                    ScriptError::Template(format!("invalid duration: {rendered}"))
                })?
            }
        };

        debug!(?duration, "delaying");
        tokio::time::sleep(duration).await;
        Ok(())
    }

    fn execute_event(
        &self,
        event: &crate::action::EventAction,
        ctx: &mut ExecutionContext,
    ) -> ScriptResult<()> {
        let template_ctx = ctx.to_template_vars();
        let mut event_data = serde_json::Map::new();

        for (key, value) in &event.event_data {
            event_data.insert(key.clone(), self.render_value(value, &template_ctx)?);
        }

        debug!(event_type = %event.event, "firing event");
        self.event_bus.fire(haven_core::Event::new(
            event.event.clone(),
            Value::Object(event_data),
            ctx.context.clone(),
        ));

        Ok(())
    }

    fn execute_variables(
        &self,
        vars: &crate::action::VariablesAction,
        ctx: &mut ExecutionContext,
    ) -> ScriptResult<()> {
        let template_ctx = ctx.to_template_vars();

        for (key, value) in &vars.variables {
            let rendered = self.render_value(value, &template_ctx)?;
            ctx.set_var(key.clone(), rendered);
        }

        Ok(())
    }

    /// Render templates inside a value: template strings are rendered and
    /// re-parsed as JSON where possible, containers recurse, everything else
    /// passes through.
    fn render_value(&self, value: &Value, template_ctx: &Value) -> ScriptResult<Value> {
        match value {
            Value::String(s) if TemplateEngine::is_template(s) => {
                let rendered = self
                    .template_engine
                    .render_with_context(s, template_ctx)
                    .map_err(|e| ScriptError::Template(e.to_string()))?;

                Ok(serde_json::from_str(&rendered).unwrap_or(Value::String(rendered)))
            }
            Value::Object(obj) => {
                let mut new_obj = serde_json::Map::new();
                for (k, v) in obj {
                    new_obj.insert(k.clone(), self.render_value(v, template_ctx)?);
                }
                Ok(Value::Object(new_obj))
            }
            Value::Array(arr) => {
                let rendered: Result<Vec<_>, _> = arr
                    .iter()
                    .map(|v| self.render_value(v, template_ctx))
                    .collect();
                Ok(Value::Array(rendered?))
            }
            _ => Ok(value.clone()),
        }
    }
}

/// Parse a rendered duration: seconds, MM:SS, or HH:MM:SS.
fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();

    if let Ok(secs) = s.parse::<f64>() {
        return Some(Duration::from_secs_f64(secs));
    }

    let parts: Vec<&str> = s.split(':').collect();
    match parts.len() {
        2 => {
            let mins: u64 = parts[0].parse().ok()?;
            let secs: u64 = parts[1].parse().ok()?;
            Some(Duration::from_secs(mins * 60 + secs))
        }
        3 => {
            let hours: u64 = parts[0].parse().ok()?;
            let mins: u64 = parts[1].parse().ok()?;
            let secs: u64 = parts[2].parse().ok()?;
            Some(Duration::from_secs(hours * 3600 + mins * 60 + secs))
        }
        _ => None,
    }
}

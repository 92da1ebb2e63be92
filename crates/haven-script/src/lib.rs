//! Action sequence execution for Haven
//!
//! Automations hand their action lists to the [`ScriptExecutor`], which runs
//! them in order. Four action kinds are supported:
//!
//! - service calls (`service:`), dispatched through the service registry
//! - delays (`delay:`), fixed or template-rendered
//! - event firing (`event:`)
//! - variable assignment (`variables:`), visible to later steps
//!
//! String values inside action data are rendered as templates before use,
//! with trigger data and accumulated variables in scope.

pub mod action;
pub mod executor;

pub use action::{Action, DelayAction, DelaySpec, EventAction, ServiceAction, Target, VariablesAction};
pub use executor::{ExecutionContext, ScriptError, ScriptExecutor, ScriptResult};

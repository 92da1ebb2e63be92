//! Automation engine types and evaluation
//!
//! Automations are event-driven rules: triggers detect events, conditions
//! gate them, and actions run when both agree. This crate owns the rule
//! types and their evaluation; action execution and the event loop live in
//! the server.
//!
//! ```text
//! event -> trigger match -> conditions pass -> actions
//! ```
//!
//! Device triggers are a level of indirection on top of state triggers: a
//! per-domain provider advertises abstract trigger descriptors for a device
//! and resolves them to concrete entity transitions at evaluation time.

pub mod automation;
pub mod condition;
pub mod device;
pub mod eval;
pub mod trigger;
pub mod trigger_eval;

pub use automation::{
    Automation, AutomationConfig, AutomationError, AutomationManager, AutomationResult,
    ExecutionMode, DEFAULT_MAX_RUNS,
};
pub use condition::{Condition, ConditionError, ConditionResult};
pub use device::{DeviceTriggerProvider, DeviceTriggerRegistry, ResolvedDeviceTrigger};
pub use eval::{ConditionEvaluator, EvalContext};
pub use trigger::{
    DeviceTrigger, EntityIdSpec, EventTrigger, StateMatch, StateTrigger, Trigger, TriggerData,
    TriggerError, TriggerResult,
};
pub use trigger_eval::{PendingMatch, TriggerEvaluator, TriggerMatch};

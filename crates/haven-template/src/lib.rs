//! Jinja2-style templates over live hub state
//!
//! Automations and scripts embed templates wherever dynamic values are
//! needed. The engine binds a minijinja environment to the state machine:
//!
//! - `states('sensor.kitchen_temp')` for state values,
//!   `states.sensor.kitchen_temp` for the full state object
//! - `is_state()`, `state_attr()`, `has_value()` for quick checks
//! - `now()`, `utcnow()`, `iif()` globals
//! - filters: `round`, `float`, `int`, `bool`, `slugify`, `regex_replace`,
//!   `to_json`, `from_json`
//!
//! `render` produces a string, `evaluate` keeps the typed value. The
//! `_with_context` variants layer extra variables (trigger data, script
//! variables) over the globals.

mod engine;
mod error;
mod filters;
mod globals;
mod states;

pub use engine::TemplateEngine;
pub use error::{TemplateError, TemplateResult};
pub use globals::DateTimeWrapper;
pub use states::{StateWrapper, StatesObject};

// Re-export so callers can consume evaluate() results without naming
// minijinja themselves.
pub use minijinja::Value;

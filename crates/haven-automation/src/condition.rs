//! Condition types
//!
//! Conditions gate a matched trigger. Every configured condition must pass
//! before the automation's actions run.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::trigger::{EntityIdSpec, StateMatch};

/// Condition errors
#[derive(Debug, Error)]
pub enum ConditionError {
    #[error("invalid condition configuration: {0}")]
    InvalidConfig(String),

    #[error("template error: {0}")]
    Template(String),

    #[error("entity not found: {0}")]
    EntityNotFound(String),

    #[error("invalid state value: {0}")]
    InvalidState(String),
}

/// Result type for condition operations
pub type ConditionResult<T> = Result<T, ConditionError>;

/// Condition definition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "condition", rename_all = "snake_case")]
pub enum Condition {
    /// Check entity state
    State(StateCondition),

    /// Evaluate a template
    Template(TemplateCondition),

    /// All conditions must be true
    And(AndCondition),

    /// Any condition must be true
    Or(OrCondition),

    /// Condition must be false
    Not(NotCondition),
}

impl Condition {
    pub fn and(conditions: Vec<Condition>) -> Self {
        Condition::And(AndCondition { conditions })
    }

    pub fn or(conditions: Vec<Condition>) -> Self {
        Condition::Or(OrCondition { conditions })
    }

    pub fn not(condition: Condition) -> Self {
        Condition::Not(NotCondition {
            conditions: vec![condition],
        })
    }
}

/// State condition, checks one or more entities against expected values.
///
/// With a list spec, every listed entity must match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateCondition {
    /// Entity IDs to check
    pub entity_id: EntityIdSpec,

    /// State to match (single value or list)
    pub state: StateMatch,

    /// Attribute to check instead of the state value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attribute: Option<String>,

    /// Treat `state` as regex patterns
    #[serde(default)]
    pub match_regex: bool,
}

/// Template condition, passes when the rendered output is truthy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateCondition {
    pub value_template: String,
}

/// AND combinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AndCondition {
    pub conditions: Vec<Condition>,
}

/// OR combinator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrCondition {
    pub conditions: Vec<Condition>,
}

/// NOT combinator, passes when none of the listed conditions pass.
///
/// Takes a list rather than a single nested condition so the "condition"
/// key is not reused inside a block already tagged by it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotCondition {
    pub conditions: Vec<Condition>,
}

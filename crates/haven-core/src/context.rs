//! Context tracks who or what caused an event or service call

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Causality context attached to every event and service call.
///
/// Contexts form chains: an automation triggered by a state change carries a
/// child of the context that produced the change, so any action can be traced
/// back to its root cause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    /// Unique ULID for this context
    pub id: String,

    /// User that initiated the action, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    /// Id of the context this one was derived from
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl Context {
    /// New root context with a fresh ULID.
    pub fn new() -> Self {
        Self {
            id: Ulid::new().to_string(),
            user_id: None,
            parent_id: None,
        }
    }

    /// New root context on behalf of a user.
    pub fn with_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: Some(user_id.into()),
            ..Self::new()
        }
    }

    /// Derive a child context, inheriting the user and recording this context
    /// as the parent.
    pub fn child(&self) -> Self {
        Self {
            id: Ulid::new().to_string(),
            user_id: self.user_id.clone(),
            parent_id: Some(self.id.clone()),
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_contexts_are_distinct() {
        let a = Context::new();
        let b = Context::new();
        assert_ne!(a.id, b.id);
        assert!(a.parent_id.is_none());
    }

    #[test]
    fn test_child_links_parent_and_user() {
        let root = Context::with_user("user-1");
        let child = root.child();

        assert_eq!(child.parent_id.as_deref(), Some(root.id.as_str()));
        assert_eq!(child.user_id.as_deref(), Some("user-1"));
        assert_ne!(child.id, root.id);
    }

    #[test]
    fn test_serde_skips_empty_fields() {
        let ctx = Context::new();
        let json = serde_json::to_value(&ctx).unwrap();
        assert!(json.get("user_id").is_none());
        assert!(json.get("parent_id").is_none());
    }
}

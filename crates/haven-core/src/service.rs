//! Service invocation payloads

use crate::Context;
use serde::{Deserialize, Serialize};

/// A request to run a service, as delivered to its handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceCall {
    /// Domain the service lives in ("light", "automation", ...)
    pub domain: String,

    /// Service name within the domain ("turn_on", "reload", ...)
    pub service: String,

    /// Caller-supplied data
    pub service_data: serde_json::Value,

    /// Causality context of the call
    pub context: Context,
}

impl ServiceCall {
    pub fn new(
        domain: impl Into<String>,
        service: impl Into<String>,
        service_data: serde_json::Value,
        context: Context,
    ) -> Self {
        Self {
            domain: domain.into(),
            service: service.into(),
            service_data,
            context,
        }
    }

    /// Call with an empty data object.
    pub fn simple(domain: impl Into<String>, service: impl Into<String>, context: Context) -> Self {
        Self::new(
            domain,
            service,
            serde_json::Value::Object(Default::default()),
            context,
        )
    }

    /// `domain.service` key for registry lookups.
    pub fn service_id(&self) -> String {
        format!("{}.{}", self.domain, self.service)
    }

    /// Fetch one field from the service data.
    pub fn get<T: serde::de::DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.service_data
            .get(key)
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Entity ids targeted by the call; accepts a single string or a list.
    pub fn entity_ids(&self) -> Vec<String> {
        match self.service_data.get("entity_id") {
            Some(serde_json::Value::String(s)) => vec![s.clone()],
            Some(serde_json::Value::Array(ids)) => ids
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Whether a service can hand data back to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SupportsResponse {
    /// Never returns a response
    #[default]
    None,
    /// May return a response when asked
    Optional,
    /// Only useful with a response
    Only,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_service_id() {
        let call = ServiceCall::simple("media_player", "media_play", Context::new());
        assert_eq!(call.service_id(), "media_player.media_play");
        assert!(call.service_data.as_object().unwrap().is_empty());
    }

    #[test]
    fn test_get_field() {
        let call = ServiceCall::new(
            "light",
            "turn_on",
            json!({"brightness": 128, "transition": 1.5}),
            Context::new(),
        );
        assert_eq!(call.get::<u8>("brightness"), Some(128));
        assert_eq!(call.get::<f64>("transition"), Some(1.5));
        assert_eq!(call.get::<String>("color"), None);
    }

    #[test]
    fn test_entity_ids_shapes() {
        let single = ServiceCall::new(
            "light",
            "turn_on",
            json!({"entity_id": "light.desk"}),
            Context::new(),
        );
        assert_eq!(single.entity_ids(), vec!["light.desk"]);

        let many = ServiceCall::new(
            "light",
            "turn_off",
            json!({"entity_id": ["light.desk", "light.shelf"]}),
            Context::new(),
        );
        assert_eq!(many.entity_ids(), vec!["light.desk", "light.shelf"]);

        let none = ServiceCall::simple("haven", "stop", Context::new());
        assert!(none.entity_ids().is_empty());
    }
}

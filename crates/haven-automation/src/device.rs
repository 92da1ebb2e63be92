//! Device trigger providers
//!
//! Integrations own the vocabulary of their device triggers: which trigger
//! types a device offers and what state transition each one stands for. The
//! registry collects one provider per domain and answers both questions for
//! the automation engine.

use crate::trigger::{DeviceTrigger, TriggerError, TriggerResult};
use indexmap::IndexMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::debug;

/// The state transition a device trigger config stands for.
///
/// A device trigger fires when `entity_id` transitions into `to_state`,
/// optionally held for `for`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedDeviceTrigger {
    pub entity_id: String,
    pub to_state: String,
    pub r#for: Option<Duration>,
}

/// Per-domain supplier of device trigger descriptors and their meaning.
pub trait DeviceTriggerProvider: Send + Sync {
    /// Integration domain the provider serves.
    fn domain(&self) -> &str;

    /// Ordered trigger descriptors for every entity of a device.
    fn triggers_for_device(&self, device_id: &str) -> Vec<DeviceTrigger>;

    /// Resolve a trigger config to the transition it matches.
    fn resolve(&self, trigger: &DeviceTrigger) -> TriggerResult<ResolvedDeviceTrigger>;
}

/// Domain-keyed collection of device trigger providers.
///
/// Providers are kept in registration order so descriptor listings are
/// stable across calls.
#[derive(Default)]
pub struct DeviceTriggerRegistry {
    providers: RwLock<IndexMap<String, Arc<dyn DeviceTriggerProvider>>>,
}

impl DeviceTriggerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its own domain, replacing any previous one.
    pub fn register(&self, provider: Arc<dyn DeviceTriggerProvider>) {
        let domain = provider.domain().to_string();
        debug!(domain, "registering device trigger provider");
        if let Ok(mut providers) = self.providers.write() {
            providers.insert(domain, provider);
        }
    }

    pub fn provider(&self, domain: &str) -> Option<Arc<dyn DeviceTriggerProvider>> {
        self.providers.read().ok()?.get(domain).cloned()
    }

    pub fn domains(&self) -> Vec<String> {
        self.providers
            .read()
            .map(|p| p.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Every trigger descriptor any provider lists for the device,
    /// concatenated in provider registration order.
    pub fn triggers_for_device(&self, device_id: &str) -> Vec<DeviceTrigger> {
        self.providers
            .read()
            .map(|providers| {
                providers
                    .values()
                    .flat_map(|p| p.triggers_for_device(device_id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Resolve a device trigger config through its domain's provider.
    pub fn resolve(&self, trigger: &DeviceTrigger) -> TriggerResult<ResolvedDeviceTrigger> {
        let provider = self
            .provider(&trigger.domain)
            .ok_or_else(|| TriggerError::UnknownProvider(trigger.domain.clone()))?;
        provider.resolve(trigger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedProvider {
        domain: String,
        to_state: String,
    }

    impl DeviceTriggerProvider for FixedProvider {
        fn domain(&self) -> &str {
            &self.domain
        }

        fn triggers_for_device(&self, device_id: &str) -> Vec<DeviceTrigger> {
            vec![DeviceTrigger {
                id: None,
                domain: self.domain.clone(),
                device_id: device_id.to_string(),
                entity_id: format!("{}.dev", self.domain),
                trigger_type: "activated".to_string(),
                r#for: None,
            }]
        }

        fn resolve(&self, trigger: &DeviceTrigger) -> TriggerResult<ResolvedDeviceTrigger> {
            if trigger.trigger_type != "activated" {
                return Err(TriggerError::UnknownTriggerType {
                    entity_id: trigger.entity_id.clone(),
                    trigger_type: trigger.trigger_type.clone(),
                });
            }
            Ok(ResolvedDeviceTrigger {
                entity_id: trigger.entity_id.clone(),
                to_state: self.to_state.clone(),
                r#for: trigger.r#for,
            })
        }
    }

    fn config(domain: &str, trigger_type: &str) -> DeviceTrigger {
        DeviceTrigger {
            id: None,
            domain: domain.to_string(),
            device_id: "dev-1".to_string(),
            entity_id: format!("{}.dev", domain),
            trigger_type: trigger_type.to_string(),
            r#for: None,
        }
    }

    #[test]
    fn resolves_through_provider() {
        let registry = DeviceTriggerRegistry::new();
        registry.register(Arc::new(FixedProvider {
            domain: "siren".to_string(),
            to_state: "wailing".to_string(),
        }));

        let resolved = registry.resolve(&config("siren", "activated")).unwrap();
        assert_eq!(resolved.entity_id, "siren.dev");
        assert_eq!(resolved.to_state, "wailing");
    }

    #[test]
    fn unknown_domain_is_an_error() {
        let registry = DeviceTriggerRegistry::new();
        let err = registry.resolve(&config("siren", "activated")).unwrap_err();
        assert!(matches!(err, TriggerError::UnknownProvider(d) if d == "siren"));
    }

    #[test]
    fn unknown_type_is_an_error() {
        let registry = DeviceTriggerRegistry::new();
        registry.register(Arc::new(FixedProvider {
            domain: "siren".to_string(),
            to_state: "wailing".to_string(),
        }));

        let err = registry.resolve(&config("siren", "deactivated")).unwrap_err();
        assert!(matches!(err, TriggerError::UnknownTriggerType { .. }));
    }

    #[test]
    fn listings_concatenate_in_registration_order() {
        let registry = DeviceTriggerRegistry::new();
        registry.register(Arc::new(FixedProvider {
            domain: "siren".to_string(),
            to_state: "wailing".to_string(),
        }));
        registry.register(Arc::new(FixedProvider {
            domain: "valve".to_string(),
            to_state: "open".to_string(),
        }));

        let triggers = registry.triggers_for_device("dev-1");
        assert_eq!(triggers.len(), 2);
        assert_eq!(triggers[0].domain, "siren");
        assert_eq!(triggers[1].domain, "valve");
        assert_eq!(registry.domains(), vec!["siren", "valve"]);
    }
}

//! Service registry with async handlers
//!
//! Services are the verbs of the hub: named operations grouped by domain
//! that components register and anything may call. Every call is announced
//! on the event bus as `call_service` before the handler runs.

use dashmap::DashMap;
use haven_core::events::CallServiceData;
use haven_core::{Context, ServiceCall, SupportsResponse};
use haven_event_bus::EventBus;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, instrument, warn};

/// Result type for service calls
pub type ServiceResult = Result<Option<serde_json::Value>, ServiceError>;

/// Future type for async service handlers
pub type ServiceFuture = Pin<Box<dyn Future<Output = ServiceResult> + Send>>;

/// Service handler function type
pub type ServiceHandler = Arc<dyn Fn(ServiceCall) -> ServiceFuture + Send + Sync>;

/// Errors that can occur when working with services
#[derive(Debug, Clone, Error)]
pub enum ServiceError {
    #[error("service not found: {domain}.{service}")]
    NotFound { domain: String, service: String },

    #[error("service call failed: {0}")]
    CallFailed(String),

    #[error("invalid service data: {0}")]
    InvalidData(String),

    #[error("service does not support responses")]
    ResponseNotSupported,
}

/// Information about a registered service
#[derive(Debug, Clone)]
pub struct ServiceDescription {
    pub domain: String,
    pub service: String,
    /// Human-readable name
    pub name: Option<String>,
    pub description: Option<String>,
    /// Whether this service can return data to the caller
    pub supports_response: SupportsResponse,
}

struct RegisteredService {
    handler: ServiceHandler,
    description: ServiceDescription,
}

/// All registered services, keyed by `domain.service`.
///
/// Handlers are plain async closures; the registry boxes them once at
/// registration and routes calls without further allocation beyond the
/// future itself.
pub struct ServiceRegistry {
    services: DashMap<String, RegisteredService>,
    bus: Arc<EventBus>,
}

impl ServiceRegistry {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self {
            services: DashMap::new(),
            bus,
        }
    }

    /// Register a service under `domain.service`, replacing any existing one.
    #[instrument(skip(self, domain, service, handler))]
    pub fn register<F, Fut>(
        &self,
        domain: impl Into<String>,
        service: impl Into<String>,
        handler: F,
        supports_response: SupportsResponse,
    ) where
        F: Fn(ServiceCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult> + Send + 'static,
    {
        let description = ServiceDescription {
            domain: domain.into(),
            service: service.into(),
            name: None,
            description: None,
            supports_response,
        };
        self.register_with_description(description, handler);
    }

    /// Register a service with a full description.
    pub fn register_with_description<F, Fut>(&self, description: ServiceDescription, handler: F)
    where
        F: Fn(ServiceCall) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ServiceResult> + Send + 'static,
    {
        let key = format!("{}.{}", description.domain, description.service);

        debug!(
            domain = %description.domain,
            service = %description.service,
            "registering service"
        );

        let handler: ServiceHandler =
            Arc::new(move |call| Box::pin(handler(call)) as ServiceFuture);

        self.services.insert(
            key,
            RegisteredService {
                handler,
                description,
            },
        );
    }

    /// Call a service and await its handler.
    ///
    /// Fires `call_service` on the bus before the handler runs, so
    /// observers see every invocation whether or not it succeeds. The
    /// response is only surfaced when `return_response` is set and the
    /// service supports it.
    #[instrument(skip(self, service_data, context))]
    pub async fn call(
        &self,
        domain: &str,
        service: &str,
        service_data: serde_json::Value,
        context: Context,
        return_response: bool,
    ) -> ServiceResult {
        let key = format!("{}.{}", domain, service);

        let registered = self.services.get(&key).ok_or_else(|| {
            warn!(domain, service, "service not found");
            ServiceError::NotFound {
                domain: domain.to_string(),
                service: service.to_string(),
            }
        })?;

        if return_response && registered.description.supports_response == SupportsResponse::None {
            return Err(ServiceError::ResponseNotSupported);
        }

        let handler = registered.handler.clone();
        drop(registered);

        self.bus.fire_typed(
            CallServiceData {
                domain: domain.to_string(),
                service: service.to_string(),
                service_data: service_data.clone(),
            },
            context.clone(),
        );

        let call = ServiceCall::new(domain, service, service_data, context);
        debug!(domain, service, "calling service");

        let result = handler(call).await?;

        if return_response {
            Ok(result)
        } else {
            Ok(None)
        }
    }

    pub fn has_service(&self, domain: &str, service: &str) -> bool {
        self.services.contains_key(&format!("{}.{}", domain, service))
    }

    pub fn get_service(&self, domain: &str, service: &str) -> Option<ServiceDescription> {
        self.services
            .get(&format!("{}.{}", domain, service))
            .map(|s| s.description.clone())
    }

    /// All services registered under a domain.
    pub fn domain_services(&self, domain: &str) -> Vec<ServiceDescription> {
        self.services
            .iter()
            .filter(|s| s.description.domain == domain)
            .map(|s| s.description.clone())
            .collect()
    }

    /// Sorted list of domains with at least one service.
    pub fn domains(&self) -> Vec<String> {
        let mut domains: Vec<_> = self
            .services
            .iter()
            .map(|s| s.description.domain.clone())
            .collect();
        domains.sort();
        domains.dedup();
        domains
    }

    /// Every registered service, grouped by domain.
    pub fn all_services(&self) -> HashMap<String, Vec<ServiceDescription>> {
        let mut result: HashMap<String, Vec<ServiceDescription>> = HashMap::new();
        for entry in self.services.iter() {
            result
                .entry(entry.description.domain.clone())
                .or_default()
                .push(entry.description.clone());
        }
        result
    }

    /// Remove a service; returns whether it existed.
    #[instrument(skip(self))]
    pub fn unregister(&self, domain: &str, service: &str) -> bool {
        let key = format!("{}.{}", domain, service);
        let removed = self.services.remove(&key).is_some();
        if removed {
            debug!(domain, service, "unregistered service");
        }
        removed
    }

    /// Remove every service in a domain, returning how many were dropped.
    ///
    /// Used when a component unloads.
    #[instrument(skip(self))]
    pub fn unregister_domain(&self, domain: &str) -> usize {
        let keys: Vec<_> = self
            .services
            .iter()
            .filter(|s| s.description.domain == domain)
            .map(|s| format!("{}.{}", s.description.domain, s.description.service))
            .collect();

        let count = keys.len();
        for key in keys {
            self.services.remove(&key);
        }

        debug!(domain, count, "unregistered domain services");
        count
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }
}

pub type SharedServiceRegistry = Arc<ServiceRegistry>;

//! Shared harness for server integration tests.
//!
//! [`TestHub`] is an assembled hub plus engine in a throwaway config
//! directory. Tests drive it through the public surface only: write states,
//! fire events, and observe recorded service calls.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use haven_core::{Context, EntityId, ServiceCall, State, SupportsResponse};
use haven_server::{AutomationEngine, Haven};
use haven_service_registry::ServiceRegistry;
use tempfile::TempDir;

pub struct TestHub {
    _dir: TempDir,
    pub haven: Haven,
    pub engine: AutomationEngine,
}

impl TestHub {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let haven = Haven::new(dir.path());
        let engine = AutomationEngine::new(&haven);
        Self {
            _dir: dir,
            haven,
            engine,
        }
    }

    /// Write an entity state under a fresh context.
    pub fn set_state(&self, entity_id: &str, state: &str) -> State {
        self.set_state_with_context(entity_id, state, Context::new())
    }

    pub fn set_state_with_context(&self, entity_id: &str, state: &str, context: Context) -> State {
        let entity_id: EntityId = entity_id.parse().expect("invalid entity id");
        self.haven
            .states
            .set(entity_id, state, HashMap::new(), context)
    }
}

/// Register a service that records every call it receives.
pub fn recording_service(
    registry: &ServiceRegistry,
    domain: &str,
    service: &str,
) -> Arc<Mutex<Vec<ServiceCall>>> {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let seen = calls.clone();
    registry.register(
        domain,
        service,
        move |call: ServiceCall| {
            let seen = seen.clone();
            async move {
                seen.lock().unwrap().push(call);
                Ok(None)
            }
        },
        SupportsResponse::None,
    );
    calls
}

/// Let the engine loop and any spawned runs catch up with the bus.
///
/// Purely cooperative; virtual time does not advance, so pending trigger
/// holds and delays stay pending.
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

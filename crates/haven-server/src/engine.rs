//! Automation execution engine.
//!
//! The engine listens on the event bus, matches each event against the
//! triggers of every enabled automation, evaluates conditions, and runs
//! action sequences through the script executor. Trigger holds are parked
//! in their own task and fire only if the matched state survives the wait.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use haven_automation::{
    Automation, AutomationManager, ConditionEvaluator, EvalContext, PendingMatch, TriggerData,
    TriggerEvaluator, TriggerMatch,
};
use haven_core::{Context, Event};
use haven_event_bus::EventBus;
use haven_script::{ExecutionContext, ScriptExecutor};
use haven_state_machine::StateMachine;
use tokio::sync::broadcast;
use tracing::{debug, error, info, trace, warn};

use crate::haven::Haven;

/// Everything a running automation needs, shared with spawned run tasks.
struct EngineCore {
    states: Arc<StateMachine>,
    manager: Arc<AutomationManager>,
    triggers: TriggerEvaluator,
    conditions: ConditionEvaluator,
    executor: ScriptExecutor,
}

/// Orchestrates the trigger, condition, action pipeline.
pub struct AutomationEngine {
    core: Arc<EngineCore>,
    bus: Arc<EventBus>,
    running: Arc<AtomicBool>,
    shutdown_tx: broadcast::Sender<()>,
}

impl AutomationEngine {
    /// Build an engine on top of an assembled hub.
    pub fn new(haven: &Haven) -> Self {
        let core = EngineCore {
            states: haven.states.clone(),
            manager: haven.automations.clone(),
            triggers: TriggerEvaluator::new(haven.device_triggers.clone()),
            conditions: ConditionEvaluator::new(haven.states.clone(), haven.templates.clone()),
            executor: ScriptExecutor::new(
                haven.services.clone(),
                haven.templates.clone(),
                haven.bus.clone(),
            ),
        };

        let (shutdown_tx, _) = broadcast::channel(1);

        Self {
            core: Arc::new(core),
            bus: haven.bus.clone(),
            running: Arc::new(AtomicBool::new(false)),
            shutdown_tx,
        }
    }

    /// Subscribe to the event bus and begin processing triggers.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("automation engine already running");
            return;
        }

        info!("starting automation engine");

        let mut events = self.bus.subscribe_all();
        let mut shutdown = self.shutdown_tx.subscribe();
        let core = self.core.clone();
        let running = self.running.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    result = events.recv() => match result {
                        Ok(event) => core.handle_event(&event),
                        Err(broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "automation engine lagged behind the event bus");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            info!("event bus closed, stopping automation engine");
                            break;
                        }
                    },
                    _ = shutdown.recv() => break,
                }
            }

            running.store(false, Ordering::SeqCst);
            info!("automation engine stopped");
        });
    }

    /// Signal the event loop to exit.
    pub fn stop(&self) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }

        info!("stopping automation engine");
        let _ = self.shutdown_tx.send(());
    }

    /// Whether the event loop is currently active.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Run an automation now, bypassing its triggers.
    ///
    /// Conditions still apply, and the run counts against the automation's
    /// execution mode like any triggered run.
    pub async fn trigger(&self, automation_id: &str, data: Option<TriggerData>) {
        let Some(automation) = self.core.manager.get(automation_id) else {
            warn!(automation_id, "automation not found");
            return;
        };

        if !automation.enabled {
            debug!(automation_id, "automation is disabled, not triggering");
            return;
        }

        let data = data.unwrap_or_else(|| TriggerData::new("manual"));
        self.core.run(&automation, data, Context::new()).await;
    }
}

impl EngineCore {
    /// Match one event against every enabled automation.
    ///
    /// Matching runs are spawned so a slow action sequence never stalls the
    /// event loop. Each run gets a child of the event's context.
    fn handle_event(self: &Arc<Self>, event: &Event) {
        trace!(event_type = %event.event_type, "processing event");

        for automation in self.manager.all() {
            if !automation.enabled {
                continue;
            }

            for trigger in &automation.triggers {
                match self.triggers.evaluate(trigger, event) {
                    Ok(Some(TriggerMatch::Fire(data))) => {
                        debug!(
                            automation_id = %automation.id,
                            platform = %data.platform,
                            "trigger matched"
                        );

                        let core = self.clone();
                        let automation = automation.clone();
                        let context = event.context.child();
                        tokio::spawn(async move {
                            core.run(&automation, data, context).await;
                        });
                    }
                    Ok(Some(TriggerMatch::Hold(pending))) => {
                        debug!(
                            automation_id = %automation.id,
                            entity_id = %pending.entity_id,
                            duration = ?pending.duration,
                            "trigger matched, waiting out hold"
                        );

                        let core = self.clone();
                        let automation = automation.clone();
                        let context = event.context.child();
                        tokio::spawn(async move {
                            core.hold_then_run(&automation, pending, context).await;
                        });
                    }
                    Ok(None) => {}
                    Err(e) => {
                        warn!(
                            automation_id = %automation.id,
                            error = %e,
                            "error evaluating trigger"
                        );
                    }
                }
            }
        }
    }

    /// Sleep through a trigger hold, then run if the state survived it.
    ///
    /// A hold is voided when the entity left the expected state at any point,
    /// even if it came back. Comparing `last_changed` catches the round trip.
    async fn hold_then_run(&self, automation: &Automation, pending: PendingMatch, context: Context) {
        tokio::time::sleep(pending.duration).await;

        let still_held = self.states.get(&pending.entity_id).is_some_and(|s| {
            s.state == pending.expected_state && s.last_changed == pending.last_changed
        });

        if !still_held {
            debug!(
                automation_id = %automation.id,
                entity_id = %pending.entity_id,
                "hold voided by a state change"
            );
            return;
        }

        self.run(automation, pending.data, context).await;
    }

    /// Run one automation: claim a run slot, check conditions, execute.
    async fn run(&self, automation: &Automation, data: TriggerData, context: Context) {
        if !self.manager.try_start(&automation.id) {
            return;
        }

        let mut eval_ctx = EvalContext::with_trigger(data.clone());
        if let Some(vars) = automation.variables.as_object() {
            for (key, value) in vars {
                eval_ctx = eval_ctx.with_var(key.clone(), value.clone());
            }
        }

        let passed = if automation.conditions.is_empty() {
            true
        } else {
            match self.conditions.evaluate_all(&automation.conditions, &eval_ctx) {
                Ok(passed) => passed,
                Err(e) => {
                    warn!(
                        automation_id = %automation.id,
                        error = %e,
                        "error evaluating conditions"
                    );
                    false
                }
            }
        };

        if passed {
            info!(
                automation_id = %automation.id,
                name = %automation.display_name(),
                "running automation"
            );
            self.manager.mark_triggered(&automation.id);

            let mut exec_ctx = ExecutionContext::with_trigger(data).with_context(context);
            if let Some(vars) = automation.variables.as_object() {
                for (key, value) in vars {
                    exec_ctx.set_var(key.clone(), value.clone());
                }
            }

            if let Err(e) = self.executor.execute(&automation.actions, &mut exec_ctx).await {
                error!(
                    automation_id = %automation.id,
                    error = %e,
                    "automation execution failed"
                );
            }
        } else {
            debug!(automation_id = %automation.id, "conditions not met");
        }

        self.manager.decrement_runs(&automation.id);
    }
}

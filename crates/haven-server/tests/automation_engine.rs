//! End-to-end automation engine tests
//!
//! Each test assembles a hub, loads automations, starts the engine, and
//! drives it through the event bus. Paused time makes delays and trigger
//! holds deterministic: nothing fires until the test lets the clock move.

mod common;

use common::{recording_service, settle, TestHub};
use haven_automation::AutomationConfig;
use haven_core::{Context, Event};
use serde_json::json;
use std::time::Duration;

fn automation(value: serde_json::Value) -> AutomationConfig {
    serde_json::from_value(value).unwrap()
}

#[tokio::test(start_paused = true)]
async fn state_trigger_runs_actions_with_trigger_data() {
    let hub = TestHub::new();
    let calls = recording_service(&hub.haven.services, "test", "record");

    hub.haven
        .automations
        .load(vec![automation(json!({
            "id": "porch_motion",
            "triggers": [{
                "platform": "state",
                "entity_id": "binary_sensor.porch_motion",
                "to": "on"
            }],
            "actions": [{
                "service": "test.record",
                "data": {
                    "cause": "{{ trigger.entity_id }}",
                    "became": "{{ trigger.to_state.state }}"
                }
            }]
        }))])
        .unwrap();

    hub.engine.start();
    settle().await;
    assert!(hub.engine.is_running());

    let context = Context::new();
    hub.set_state_with_context("binary_sensor.porch_motion", "on", context.clone());
    settle().await;

    {
        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].service_data["cause"], "binary_sensor.porch_motion");
        assert_eq!(calls[0].service_data["became"], "on");
        // The run inherits causality from the event that triggered it.
        assert_eq!(
            calls[0].context.parent_id.as_deref(),
            Some(context.id.as_str())
        );
    }

    let automation = hub.haven.automations.get("porch_motion").unwrap();
    assert!(automation.last_triggered.is_some());
    assert_eq!(automation.current_runs, 0);
}

#[tokio::test(start_paused = true)]
async fn conditions_gate_actions() {
    let hub = TestHub::new();
    let calls = recording_service(&hub.haven.services, "test", "record");

    hub.haven
        .automations
        .load(vec![automation(json!({
            "id": "night_light",
            "triggers": [{
                "platform": "state",
                "entity_id": "binary_sensor.porch_motion",
                "to": "on"
            }],
            "conditions": [{
                "condition": "state",
                "entity_id": "sensor.house_mode",
                "state": "night"
            }],
            "actions": [{"service": "test.record"}]
        }))])
        .unwrap();

    hub.engine.start();
    settle().await;

    hub.set_state("sensor.house_mode", "day");
    hub.set_state("binary_sensor.porch_motion", "on");
    settle().await;
    assert!(calls.lock().unwrap().is_empty());

    hub.set_state("sensor.house_mode", "night");
    hub.set_state("binary_sensor.porch_motion", "off");
    hub.set_state("binary_sensor.porch_motion", "on");
    settle().await;
    assert_eq!(calls.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn template_condition_reads_trigger_data() {
    let hub = TestHub::new();
    let calls = recording_service(&hub.haven.services, "test", "record");

    // The trigger matches any change; the condition filters on direction.
    hub.haven
        .automations
        .load(vec![automation(json!({
            "id": "fan_on_only",
            "triggers": [{"platform": "state", "entity_id": "switch.fan"}],
            "conditions": [{
                "condition": "template",
                "value_template": "{{ trigger.to_state.state == 'on' }}"
            }],
            "actions": [{"service": "test.record"}]
        }))])
        .unwrap();

    hub.engine.start();
    settle().await;

    hub.set_state("switch.fan", "on");
    settle().await;
    assert_eq!(calls.lock().unwrap().len(), 1);

    hub.set_state("switch.fan", "off");
    settle().await;
    assert_eq!(calls.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn disabled_automations_are_skipped() {
    let hub = TestHub::new();
    let calls = recording_service(&hub.haven.services, "test", "record");

    hub.haven
        .automations
        .load(vec![automation(json!({
            "id": "dormant",
            "enabled": false,
            "triggers": [{"platform": "state", "entity_id": "switch.fan", "to": "on"}],
            "actions": [{"service": "test.record"}]
        }))])
        .unwrap();

    hub.engine.start();
    settle().await;

    hub.set_state("switch.fan", "on");
    settle().await;
    assert!(calls.lock().unwrap().is_empty());

    hub.haven.automations.enable("dormant").unwrap();
    hub.set_state("switch.fan", "off");
    hub.set_state("switch.fan", "on");
    settle().await;
    assert_eq!(calls.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn single_mode_skips_overlapping_runs() {
    let hub = TestHub::new();
    let calls = recording_service(&hub.haven.services, "test", "record");

    hub.haven
        .automations
        .load(vec![automation(json!({
            "id": "slow_single",
            "mode": "single",
            "triggers": [{"platform": "state", "entity_id": "switch.fan", "to": "on"}],
            "actions": [
                {"delay": {"seconds": 5}},
                {"service": "test.record"}
            ]
        }))])
        .unwrap();

    hub.engine.start();
    settle().await;

    hub.set_state("switch.fan", "on");
    settle().await;

    // The first run is parked in its delay; an overlapping trigger is dropped.
    hub.set_state("switch.fan", "off");
    hub.set_state("switch.fan", "on");
    settle().await;

    tokio::time::sleep(Duration::from_secs(6)).await;
    settle().await;
    assert_eq!(calls.lock().unwrap().len(), 1);

    // With the slot free again the next trigger goes through.
    hub.set_state("switch.fan", "off");
    hub.set_state("switch.fan", "on");
    settle().await;
    tokio::time::sleep(Duration::from_secs(6)).await;
    settle().await;
    assert_eq!(calls.lock().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn parallel_mode_caps_concurrent_runs() {
    let hub = TestHub::new();
    let calls = recording_service(&hub.haven.services, "test", "record");

    hub.haven
        .automations
        .load(vec![automation(json!({
            "id": "capped",
            "mode": "parallel",
            "max": 2,
            "triggers": [{"platform": "state", "entity_id": "switch.fan", "to": "on"}],
            "actions": [
                {"delay": {"seconds": 5}},
                {"service": "test.record"}
            ]
        }))])
        .unwrap();

    hub.engine.start();
    settle().await;

    for _ in 0..3 {
        hub.set_state("switch.fan", "on");
        settle().await;
        hub.set_state("switch.fan", "off");
        settle().await;
    }

    tokio::time::sleep(Duration::from_secs(6)).await;
    settle().await;

    // Three triggers, two run slots.
    assert_eq!(calls.lock().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn trigger_hold_fires_after_quiet_period() {
    let hub = TestHub::new();
    let calls = recording_service(&hub.haven.services, "test", "record");

    hub.haven
        .automations
        .load(vec![automation(json!({
            "id": "long_motion",
            "triggers": [{
                "platform": "state",
                "entity_id": "binary_sensor.porch_motion",
                "to": "on",
                "for": "00:00:30"
            }],
            "actions": [{
                "service": "test.record",
                "data": {"still": "{{ trigger.to_state.state }}"}
            }]
        }))])
        .unwrap();

    hub.engine.start();
    settle().await;

    hub.set_state("binary_sensor.porch_motion", "on");
    settle().await;
    assert!(calls.lock().unwrap().is_empty(), "hold fired early");

    tokio::time::sleep(Duration::from_secs(31)).await;
    settle().await;

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].service_data["still"], "on");
}

#[tokio::test(start_paused = true)]
async fn trigger_hold_voided_by_state_change() {
    let hub = TestHub::new();
    let calls = recording_service(&hub.haven.services, "test", "record");

    hub.haven
        .automations
        .load(vec![automation(json!({
            "id": "long_motion",
            "triggers": [{
                "platform": "state",
                "entity_id": "binary_sensor.porch_motion",
                "to": "on",
                "for": "00:00:30"
            }],
            "actions": [{"service": "test.record"}]
        }))])
        .unwrap();

    hub.engine.start();
    settle().await;

    hub.set_state("binary_sensor.porch_motion", "on");
    settle().await;
    hub.set_state("binary_sensor.porch_motion", "off");
    settle().await;

    tokio::time::sleep(Duration::from_secs(31)).await;
    settle().await;
    assert!(calls.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn hold_requires_an_uninterrupted_state() {
    let hub = TestHub::new();
    let calls = recording_service(&hub.haven.services, "test", "record");

    hub.haven
        .automations
        .load(vec![automation(json!({
            "id": "long_motion",
            "triggers": [{
                "platform": "state",
                "entity_id": "binary_sensor.porch_motion",
                "to": "on",
                "for": "00:00:30"
            }],
            "actions": [{"service": "test.record"}]
        }))])
        .unwrap();

    hub.engine.start();
    settle().await;

    // On, off, on again: the first hold is voided even though the entity is
    // back in the expected state, because last_changed moved. Only the
    // second hold fires.
    hub.set_state("binary_sensor.porch_motion", "on");
    settle().await;
    hub.set_state("binary_sensor.porch_motion", "off");
    settle().await;
    hub.set_state("binary_sensor.porch_motion", "on");
    settle().await;

    tokio::time::sleep(Duration::from_secs(31)).await;
    settle().await;
    assert_eq!(calls.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn event_trigger_matches_payload_subset() {
    let hub = TestHub::new();
    let calls = recording_service(&hub.haven.services, "test", "record");

    hub.haven
        .automations
        .load(vec![automation(json!({
            "id": "scene_button",
            "triggers": [{
                "platform": "event",
                "event_type": "panel_button",
                "event_data": {"button": 3}
            }],
            "actions": [{
                "service": "test.record",
                "data": {"pressed": "{{ trigger.event.button }}"}
            }]
        }))])
        .unwrap();

    hub.engine.start();
    settle().await;

    hub.haven.bus.fire(Event::new(
        "panel_button",
        json!({"button": 4}),
        Context::new(),
    ));
    settle().await;
    assert!(calls.lock().unwrap().is_empty());

    hub.haven.bus.fire(Event::new(
        "panel_button",
        json!({"button": 3, "hold": false}),
        Context::new(),
    ));
    settle().await;

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].service_data["pressed"], 3);
}

#[tokio::test(start_paused = true)]
async fn automation_variables_reach_templates() {
    let hub = TestHub::new();
    let calls = recording_service(&hub.haven.services, "test", "record");

    hub.haven
        .automations
        .load(vec![automation(json!({
            "id": "configured",
            "variables": {"room": "den"},
            "triggers": [{"platform": "state", "entity_id": "switch.fan", "to": "on"}],
            "conditions": [{
                "condition": "template",
                "value_template": "{{ room == 'den' }}"
            }],
            "actions": [{
                "service": "test.record",
                "data": {"where": "{{ room }}"}
            }]
        }))])
        .unwrap();

    hub.engine.start();
    settle().await;

    hub.set_state("switch.fan", "on");
    settle().await;

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].service_data["where"], "den");
}

#[tokio::test]
async fn manual_trigger_runs_without_the_engine_loop() {
    let hub = TestHub::new();
    let calls = recording_service(&hub.haven.services, "test", "record");

    hub.haven
        .automations
        .load(vec![automation(json!({
            "id": "on_demand",
            "actions": [{
                "service": "test.record",
                "data": {"source": "{{ trigger.platform }}"}
            }]
        }))])
        .unwrap();

    hub.engine.trigger("on_demand", None).await;

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].service_data["source"], "manual");
}

#[tokio::test]
async fn manual_trigger_of_unknown_automation_is_a_no_op() {
    let hub = TestHub::new();
    let calls = recording_service(&hub.haven.services, "test", "record");

    hub.engine.trigger("ghost", None).await;
    assert!(calls.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn stop_halts_event_processing() {
    let hub = TestHub::new();
    let calls = recording_service(&hub.haven.services, "test", "record");

    hub.haven
        .automations
        .load(vec![automation(json!({
            "id": "porch_motion",
            "triggers": [{"platform": "state", "entity_id": "switch.fan", "to": "on"}],
            "actions": [{"service": "test.record"}]
        }))])
        .unwrap();

    hub.engine.start();
    settle().await;

    hub.engine.stop();
    settle().await;
    assert!(!hub.engine.is_running());

    hub.set_state("switch.fan", "on");
    settle().await;
    assert!(calls.lock().unwrap().is_empty());
}

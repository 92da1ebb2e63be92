//! Device triggers for binary sensors
//!
//! Every device class has a fixed pair of trigger types, one per transition
//! direction: `bat_low` fires when a battery sensor turns "on", `not_bat_low`
//! when it returns to "off". Sensors without a device class get the generic
//! `turned_on` / `turned_off` pair.

use super::{BinarySensorDeviceClass, DOMAIN};
use haven_automation::{
    DeviceTrigger, DeviceTriggerProvider, ResolvedDeviceTrigger, TriggerError, TriggerResult,
};
use haven_core::{STATE_OFF, STATE_ON};
use haven_registries::EntityRegistry;
use std::sync::Arc;

/// The `(on, off)` trigger type pair for a device class.
pub fn trigger_types(
    device_class: Option<BinarySensorDeviceClass>,
) -> (&'static str, &'static str) {
    use BinarySensorDeviceClass::*;

    match device_class {
        Some(Battery) => ("bat_low", "not_bat_low"),
        Some(BatteryCharging) => ("charging", "not_charging"),
        Some(Co) => ("co", "no_co"),
        Some(Cold) => ("cold", "not_cold"),
        Some(Connectivity) => ("connected", "not_connected"),
        Some(Door) => ("opened", "not_opened"),
        Some(GarageDoor) => ("opened", "not_opened"),
        Some(Gas) => ("gas", "no_gas"),
        Some(Heat) => ("hot", "not_hot"),
        Some(Light) => ("light", "no_light"),
        // An "on" lock sensor is unlocked.
        Some(Lock) => ("not_locked", "locked"),
        Some(Moisture) => ("moist", "not_moist"),
        Some(Motion) => ("motion", "no_motion"),
        Some(Moving) => ("moving", "not_moving"),
        Some(Occupancy) => ("occupied", "not_occupied"),
        Some(Opening) => ("opened", "not_opened"),
        Some(Plug) => ("plugged_in", "not_plugged_in"),
        Some(Power) => ("powered", "not_powered"),
        Some(Presence) => ("present", "not_present"),
        Some(Problem) => ("problem", "no_problem"),
        Some(Running) => ("running", "not_running"),
        Some(Safety) => ("unsafe", "not_unsafe"),
        Some(Smoke) => ("smoke", "no_smoke"),
        Some(Sound) => ("sound", "no_sound"),
        Some(Tamper) => ("tampered", "not_tampered"),
        Some(Update) => ("update", "no_update"),
        Some(Vibration) => ("vibration", "no_vibration"),
        Some(Window) => ("opened", "not_opened"),
        None => ("turned_on", "turned_off"),
    }
}

/// Device trigger provider for the binary_sensor domain, backed by the
/// entity registry.
pub struct BinarySensorTriggerProvider {
    entities: Arc<EntityRegistry>,
}

impl BinarySensorTriggerProvider {
    pub fn new(entities: Arc<EntityRegistry>) -> Self {
        Self { entities }
    }

    fn device_class_of(&self, entity_id: &str) -> Option<BinarySensorDeviceClass> {
        self.entities
            .get(entity_id)?
            .effective_device_class()
            .and_then(BinarySensorDeviceClass::from_name)
    }
}

impl DeviceTriggerProvider for BinarySensorTriggerProvider {
    fn domain(&self) -> &str {
        DOMAIN
    }

    /// Two descriptors per binary_sensor entity of the device, on-type
    /// first, in entity registration order.
    fn triggers_for_device(&self, device_id: &str) -> Vec<DeviceTrigger> {
        let mut triggers = Vec::new();

        for entry in self.entities.entries_for_device(device_id) {
            if entry.domain() != DOMAIN {
                continue;
            }

            let device_class = entry
                .effective_device_class()
                .and_then(BinarySensorDeviceClass::from_name);
            let (on_type, off_type) = trigger_types(device_class);

            for trigger_type in [on_type, off_type] {
                triggers.push(DeviceTrigger {
                    id: None,
                    domain: DOMAIN.to_string(),
                    device_id: device_id.to_string(),
                    entity_id: entry.entity_id.clone(),
                    trigger_type: trigger_type.to_string(),
                    r#for: None,
                });
            }
        }

        triggers
    }

    fn resolve(&self, trigger: &DeviceTrigger) -> TriggerResult<ResolvedDeviceTrigger> {
        let device_class = self.device_class_of(&trigger.entity_id);
        let (on_type, off_type) = trigger_types(device_class);

        let to_state = if trigger.trigger_type == on_type {
            STATE_ON
        } else if trigger.trigger_type == off_type {
            STATE_OFF
        } else {
            return Err(TriggerError::UnknownTriggerType {
                entity_id: trigger.entity_id.clone(),
                trigger_type: trigger.trigger_type.clone(),
            });
        };

        Ok(ResolvedDeviceTrigger {
            entity_id: trigger.entity_id.clone(),
            to_state: to_state.to_string(),
            r#for: trigger.r#for,
        })
    }
}

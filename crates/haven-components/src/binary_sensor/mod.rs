//! Binary sensor component
//!
//! Binary sensors report one of two states, "on" or "off". The device class
//! gives those states their meaning: an "on" `door` is open, an "on"
//! `battery` is low. Device triggers for the domain live in
//! [`device_trigger`].

pub mod device_trigger;

use serde::{Deserialize, Serialize};

/// Binary sensor domain name
pub const DOMAIN: &str = "binary_sensor";

/// Semantic subtype of a binary sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BinarySensorDeviceClass {
    /// On means low battery
    Battery,
    /// On means charging
    BatteryCharging,
    /// On means carbon monoxide detected
    Co,
    /// On means cold
    Cold,
    /// On means connected
    Connectivity,
    /// On means open
    Door,
    /// On means open
    GarageDoor,
    /// On means gas detected
    Gas,
    /// On means hot
    Heat,
    /// On means light detected
    Light,
    /// On means unlocked
    Lock,
    /// On means wet
    Moisture,
    /// On means motion detected
    Motion,
    /// On means moving
    Moving,
    /// On means occupied
    Occupancy,
    /// On means open
    Opening,
    /// On means plugged in
    Plug,
    /// On means power detected
    Power,
    /// On means someone is home
    Presence,
    /// On means a problem is detected
    Problem,
    /// On means running
    Running,
    /// On means unsafe
    Safety,
    /// On means smoke detected
    Smoke,
    /// On means sound detected
    Sound,
    /// On means tampering detected
    Tamper,
    /// On means an update is available
    Update,
    /// On means vibration detected
    Vibration,
    /// On means open
    Window,
}

impl BinarySensorDeviceClass {
    /// Every device class, in name order.
    pub const ALL: [BinarySensorDeviceClass; 28] = [
        Self::Battery,
        Self::BatteryCharging,
        Self::Co,
        Self::Cold,
        Self::Connectivity,
        Self::Door,
        Self::GarageDoor,
        Self::Gas,
        Self::Heat,
        Self::Light,
        Self::Lock,
        Self::Moisture,
        Self::Motion,
        Self::Moving,
        Self::Occupancy,
        Self::Opening,
        Self::Plug,
        Self::Power,
        Self::Presence,
        Self::Problem,
        Self::Running,
        Self::Safety,
        Self::Smoke,
        Self::Sound,
        Self::Tamper,
        Self::Update,
        Self::Vibration,
        Self::Window,
    ];

    /// Snake_case name, as stored in registry entries and state attributes.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Battery => "battery",
            Self::BatteryCharging => "battery_charging",
            Self::Co => "co",
            Self::Cold => "cold",
            Self::Connectivity => "connectivity",
            Self::Door => "door",
            Self::GarageDoor => "garage_door",
            Self::Gas => "gas",
            Self::Heat => "heat",
            Self::Light => "light",
            Self::Lock => "lock",
            Self::Moisture => "moisture",
            Self::Motion => "motion",
            Self::Moving => "moving",
            Self::Occupancy => "occupancy",
            Self::Opening => "opening",
            Self::Plug => "plug",
            Self::Power => "power",
            Self::Presence => "presence",
            Self::Problem => "problem",
            Self::Running => "running",
            Self::Safety => "safety",
            Self::Smoke => "smoke",
            Self::Sound => "sound",
            Self::Tamper => "tamper",
            Self::Update => "update",
            Self::Vibration => "vibration",
            Self::Window => "window",
        }
    }

    /// Look a class up by its snake_case name.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().find(|c| c.as_str() == name).copied()
    }
}

impl std::fmt::Display for BinarySensorDeviceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

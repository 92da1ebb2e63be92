//! Built-in Haven components
//!
//! Integrations that ship with the hub: the `binary_sensor` domain with its
//! device triggers, and the `soundhub` network audio controller with its
//! config flow.

pub mod binary_sensor;
pub mod soundhub;

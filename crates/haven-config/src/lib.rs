//! YAML configuration loading for the hub.
//!
//! Supports the hub's custom tags:
//!
//! - `!include path` - include another YAML file
//! - `!include_dir_merge_list dir` - merge lists from all YAML files in a
//!   directory
//! - `!secret key` - substitute from `secrets.yaml`
//! - `!env_var VAR [default]` - environment variable substitution
//!
//! [`HubConfig`] parses `configuration.yaml` into the hub name and the
//! automation list.

mod error;
mod hub_config;
mod loader;
mod secrets;

pub use error::{ConfigError, ConfigResult};
pub use hub_config::HubConfig;
pub use loader::{load_yaml, YamlLoader};
pub use secrets::Secrets;

pub use serde_yaml::Value;

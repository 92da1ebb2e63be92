//! Hub configuration parsed from `configuration.yaml`.
//!
//! The file has a `haven:` section for hub-level settings and an
//! `automation:` key holding the automation list, typically via
//! `!include automations.yaml`.

use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{ConfigError, ConfigResult};
use crate::loader::YamlLoader;

use haven_automation::AutomationConfig;

#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Display name from the `haven:` section.
    pub name: String,
    /// Directory `configuration.yaml` was loaded from.
    pub config_dir: PathBuf,
    /// Automations from the `automation:` key.
    pub automations: Vec<AutomationConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct HubSection {
    #[serde(default = "default_name")]
    name: String,
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            name: default_name(),
        }
    }
}

fn default_name() -> String {
    "Haven".to_string()
}

impl HubConfig {
    /// Load `configuration.yaml` from a config directory and expand all
    /// tags in it.
    pub fn load(config_dir: impl AsRef<Path>) -> ConfigResult<Self> {
        let config_dir = config_dir.as_ref();
        let mut loader = YamlLoader::new(config_dir)?;
        let yaml = loader.load_file("configuration.yaml")?;

        let config = Self::from_yaml(config_dir, &yaml)?;
        info!(
            name = %config.name,
            automations = config.automations.len(),
            "loaded hub configuration"
        );
        Ok(config)
    }

    pub fn from_yaml(config_dir: impl Into<PathBuf>, yaml: &Value) -> ConfigResult<Self> {
        let mapping = yaml
            .as_mapping()
            .ok_or_else(|| ConfigError::InvalidSection {
                section: "root".to_string(),
                reason: "configuration must be a mapping".to_string(),
            })?;

        let hub: HubSection = match mapping.get(&Value::from("haven")) {
            Some(section) => serde_yaml::from_value(section.clone()).map_err(|e| {
                ConfigError::InvalidSection {
                    section: "haven".to_string(),
                    reason: e.to_string(),
                }
            })?,
            None => HubSection::default(),
        };

        let automations = match mapping.get(&Value::from("automation")) {
            None | Some(Value::Null) => Vec::new(),
            // A single automation mapping counts as a one-element list.
            Some(single @ Value::Mapping(_)) => {
                vec![parse_automation(single)?]
            }
            Some(Value::Sequence(seq)) => seq
                .iter()
                .map(parse_automation)
                .collect::<ConfigResult<Vec<_>>>()?,
            Some(other) => {
                return Err(ConfigError::InvalidSection {
                    section: "automation".to_string(),
                    reason: format!("expected a list, got {other:?}"),
                })
            }
        };

        Ok(Self {
            name: hub.name,
            config_dir: config_dir.into(),
            automations,
        })
    }

    /// Where registries and other persisted state live.
    pub fn storage_dir(&self) -> PathBuf {
        self.config_dir.join(".storage")
    }
}

fn parse_automation(value: &Value) -> ConfigResult<AutomationConfig> {
    serde_yaml::from_value(value.clone()).map_err(|e| ConfigError::InvalidSection {
        section: "automation".to_string(),
        reason: e.to_string(),
    })
}

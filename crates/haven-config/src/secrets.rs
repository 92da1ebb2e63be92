//! `secrets.yaml` store backing the `!secret` tag.

use crate::error::{ConfigError, ConfigResult};
use serde_yaml::Value;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use tracing::debug;

/// Secrets keep their YAML type: a numeric secret substitutes as a number,
/// not as its string form.
#[derive(Debug, Clone, Default)]
pub struct Secrets {
    values: HashMap<String, Value>,
}

impl Secrets {
    /// Load `secrets.yaml` from the config directory. A missing file is an
    /// empty store, not an error.
    pub fn load(config_dir: &Path) -> ConfigResult<Self> {
        let path = config_dir.join("secrets.yaml");
        if !path.exists() {
            debug!(path = %path.display(), "no secrets.yaml, starting empty");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let values: HashMap<String, Value> =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.clone(),
                source,
            })?;

        debug!(count = values.len(), path = %path.display(), "loaded secrets");
        Ok(Self { values })
    }

    pub fn get(&self, key: &str) -> ConfigResult<&Value> {
        self.values
            .get(key)
            .ok_or_else(|| ConfigError::SecretNotFound(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

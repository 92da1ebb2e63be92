//! YAML loader with the hub's custom tags.
//!
//! - `!include file.yaml` pulls in another file, resolved relative to the
//!   including file
//! - `!include_dir_merge_list dir` concatenates the lists from every YAML
//!   file in a directory, in filename order
//! - `!secret key` substitutes a value from `secrets.yaml`
//! - `!env_var VAR [default]` substitutes an environment variable
//!
//! Any other tag is an error.

use crate::error::{ConfigError, ConfigResult};
use crate::secrets::Secrets;
use serde_yaml::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

pub struct YamlLoader {
    config_dir: PathBuf,
    secrets: Secrets,
    /// Files currently being loaded, outermost first.
    stack: Vec<PathBuf>,
}

impl YamlLoader {
    pub fn new(config_dir: impl Into<PathBuf>) -> ConfigResult<Self> {
        let config_dir = config_dir.into();
        let secrets = Secrets::load(&config_dir)?;
        Ok(Self::with_secrets(config_dir, secrets))
    }

    pub fn with_secrets(config_dir: impl Into<PathBuf>, secrets: Secrets) -> Self {
        Self {
            config_dir: config_dir.into(),
            secrets,
            stack: Vec::new(),
        }
    }

    /// Load a file and expand every tag in it. Relative paths resolve
    /// against the config directory.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> ConfigResult<Value> {
        let path = self.absolute(path.as_ref());
        if self.stack.contains(&path) {
            return Err(ConfigError::CircularInclude { path });
        }
        debug!(path = %path.display(), "loading YAML file");

        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;

        self.stack.push(path.clone());
        let result = self.load_str(&content, &path);
        self.stack.pop();
        result
    }

    /// Parse YAML text and expand its tags. `source` names the origin for
    /// errors and relative include resolution.
    pub fn load_str(&mut self, content: &str, source: &Path) -> ConfigResult<Value> {
        let value: Value = serde_yaml::from_str(content).map_err(|e| ConfigError::Parse {
            path: source.to_path_buf(),
            source: e,
        })?;
        self.expand(value, source)
    }

    pub fn secrets(&self) -> &Secrets {
        &self.secrets
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    fn expand(&mut self, value: Value, source: &Path) -> ConfigResult<Value> {
        match value {
            Value::Tagged(tagged) => {
                let tag = tagged.tag.to_string();
                trace!(%tag, "expanding tag");
                match tag.as_str() {
                    "!include" => {
                        let target = self.relative_to(source, string_arg(&tag, &tagged.value)?);
                        self.load_file(target)
                    }
                    "!include_dir_merge_list" => {
                        let dir = self.relative_to(source, string_arg(&tag, &tagged.value)?);
                        self.merge_dir_lists(&dir)
                    }
                    "!secret" => {
                        let key = string_arg(&tag, &tagged.value)?;
                        let secret = self.secrets.get(key)?.clone();
                        debug!(%key, "substituted secret");
                        Ok(secret)
                    }
                    "!env_var" => env_var(string_arg(&tag, &tagged.value)?),
                    _ => Err(ConfigError::UnknownTag {
                        tag,
                        path: source.to_path_buf(),
                    }),
                }
            }
            Value::Mapping(map) => {
                let mut out = serde_yaml::Mapping::with_capacity(map.len());
                for (k, v) in map {
                    out.insert(self.expand(k, source)?, self.expand(v, source)?);
                }
                Ok(Value::Mapping(out))
            }
            Value::Sequence(seq) => seq
                .into_iter()
                .map(|v| self.expand(v, source))
                .collect::<ConfigResult<Vec<_>>>()
                .map(Value::Sequence),
            other => Ok(other),
        }
    }

    /// Concatenate the list contents of every `*.yaml` / `*.yml` file in a
    /// directory, in filename order. A file holding a single non-list
    /// document contributes one element.
    fn merge_dir_lists(&mut self, dir: &Path) -> ConfigResult<Value> {
        if !dir.is_dir() {
            return Err(ConfigError::MissingDirectory(dir.to_path_buf()));
        }

        let mut files: Vec<PathBuf> = fs::read_dir(dir)
            .map_err(|source| ConfigError::Read {
                path: dir.to_path_buf(),
                source,
            })?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|p| {
                p.extension()
                    .is_some_and(|ext| ext == "yaml" || ext == "yml")
            })
            .collect();
        files.sort();

        let mut merged = Vec::new();
        for file in files {
            match self.load_file(&file)? {
                Value::Sequence(seq) => merged.extend(seq),
                Value::Null => {}
                other => merged.push(other),
            }
        }
        Ok(Value::Sequence(merged))
    }

    /// Resolve an include target against the file that names it.
    fn relative_to(&self, source: &Path, target: &str) -> PathBuf {
        if Path::new(target).is_absolute() {
            return PathBuf::from(target);
        }
        source
            .parent()
            .unwrap_or(&self.config_dir)
            .join(target)
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.config_dir.join(path)
        }
    }
}

/// Expand `VAR` or `VAR default...` into the variable's value, the default,
/// or an error when neither exists.
fn env_var(arg: &str) -> ConfigResult<Value> {
    let mut parts = arg.split_whitespace();
    let var = parts
        .next()
        .ok_or_else(|| ConfigError::TagArgument {
            tag: "!env_var".to_string(),
        })?;

    match std::env::var(var) {
        Ok(value) => Ok(Value::String(value)),
        Err(_) => {
            let default = parts.collect::<Vec<_>>().join(" ");
            if default.is_empty() {
                Err(ConfigError::EnvVarNotSet(var.to_string()))
            } else {
                Ok(Value::String(default))
            }
        }
    }
}

fn string_arg<'v>(tag: &str, value: &'v Value) -> ConfigResult<&'v str> {
    value.as_str().ok_or_else(|| ConfigError::TagArgument {
        tag: tag.to_string(),
    })
}

/// One-shot load of a file under a config directory.
pub fn load_yaml(config_dir: impl Into<PathBuf>, file: impl AsRef<Path>) -> ConfigResult<Value> {
    YamlLoader::new(config_dir)?.load_file(file)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(dir: &Path, name: &str, content: &str) {
        let path = dir.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    fn key(name: &str) -> Value {
        Value::String(name.to_string())
    }

    #[test]
    fn plain_yaml_loads() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "configuration.yaml", "name: Home\nport: 8123\n");

        let value = load_yaml(dir.path(), "configuration.yaml").unwrap();
        let map = value.as_mapping().unwrap();
        assert_eq!(map.get(&key("port")), Some(&Value::from(8123)));
    }

    #[test]
    fn includes_resolve_relative_to_the_including_file() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "rooms/kitchen.yaml", "lights: !include lamps.yaml\n");
        write(dir.path(), "rooms/lamps.yaml", "- lamp_one\n- lamp_two\n");
        write(
            dir.path(),
            "configuration.yaml",
            "kitchen: !include rooms/kitchen.yaml\n",
        );

        let value = load_yaml(dir.path(), "configuration.yaml").unwrap();
        let kitchen = value.as_mapping().unwrap().get(&key("kitchen")).unwrap();
        let lights = kitchen.as_mapping().unwrap().get(&key("lights")).unwrap();
        assert_eq!(lights.as_sequence().unwrap().len(), 2);
    }

    #[test]
    fn circular_include_is_detected() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "a.yaml", "b: !include b.yaml\n");
        write(dir.path(), "b.yaml", "a: !include a.yaml\n");

        let result = load_yaml(dir.path(), "a.yaml");
        assert!(matches!(result, Err(ConfigError::CircularInclude { .. })));
    }

    #[test]
    fn secret_substitution_keeps_the_value_type() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "secrets.yaml", "api_key: abc123\ndb_port: 5432\n");
        write(
            dir.path(),
            "configuration.yaml",
            "key: !secret api_key\nport: !secret db_port\n",
        );

        let value = load_yaml(dir.path(), "configuration.yaml").unwrap();
        let map = value.as_mapping().unwrap();
        assert_eq!(map.get(&key("key")), Some(&Value::from("abc123")));
        assert_eq!(map.get(&key("port")), Some(&Value::from(5432)));
    }

    #[test]
    fn missing_secret_is_an_error() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "configuration.yaml", "key: !secret nope\n");

        let result = load_yaml(dir.path(), "configuration.yaml");
        assert!(matches!(result, Err(ConfigError::SecretNotFound(_))));
    }

    #[test]
    fn env_var_substitution_and_default() {
        let dir = TempDir::new().unwrap();
        std::env::set_var("HAVEN_LOADER_TEST_VAR", "from_env");
        write(
            dir.path(),
            "configuration.yaml",
            "set: !env_var HAVEN_LOADER_TEST_VAR\nunset: !env_var HAVEN_LOADER_TEST_MISSING fallback\n",
        );

        let value = load_yaml(dir.path(), "configuration.yaml").unwrap();
        let map = value.as_mapping().unwrap();
        assert_eq!(map.get(&key("set")), Some(&Value::from("from_env")));
        assert_eq!(map.get(&key("unset")), Some(&Value::from("fallback")));

        std::env::remove_var("HAVEN_LOADER_TEST_VAR");
    }

    #[test]
    fn unset_env_var_without_default_is_an_error() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "configuration.yaml",
            "v: !env_var HAVEN_LOADER_TEST_NEVER_SET\n",
        );

        let result = load_yaml(dir.path(), "configuration.yaml");
        assert!(matches!(result, Err(ConfigError::EnvVarNotSet(_))));
    }

    #[test]
    fn merge_list_concatenates_in_filename_order() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "automations/10_lights.yaml",
            "- alias: porch on\n- alias: porch off\n",
        );
        write(dir.path(), "automations/20_alarm.yaml", "- alias: arm\n");
        write(
            dir.path(),
            "configuration.yaml",
            "automation: !include_dir_merge_list automations\n",
        );

        let value = load_yaml(dir.path(), "configuration.yaml").unwrap();
        let list = value
            .as_mapping()
            .unwrap()
            .get(&key("automation"))
            .unwrap()
            .as_sequence()
            .unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(
            list[0].as_mapping().unwrap().get(&key("alias")),
            Some(&Value::from("porch on"))
        );
        assert_eq!(
            list[2].as_mapping().unwrap().get(&key("alias")),
            Some(&Value::from("arm"))
        );
    }

    #[test]
    fn merge_list_of_missing_directory_is_an_error() {
        let dir = TempDir::new().unwrap();
        write(
            dir.path(),
            "configuration.yaml",
            "automation: !include_dir_merge_list nowhere\n",
        );

        let result = load_yaml(dir.path(), "configuration.yaml");
        assert!(matches!(result, Err(ConfigError::MissingDirectory(_))));
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "configuration.yaml", "v: !mystery thing\n");

        let result = load_yaml(dir.path(), "configuration.yaml");
        assert!(matches!(result, Err(ConfigError::UnknownTag { .. })));
    }

    #[test]
    fn load_str_expands_tags() {
        let dir = TempDir::new().unwrap();
        write(dir.path(), "secrets.yaml", "token: t0k3n\n");

        let mut loader = YamlLoader::new(dir.path()).unwrap();
        let value = loader
            .load_str("auth: !secret token", Path::new("inline.yaml"))
            .unwrap();
        assert_eq!(
            value.as_mapping().unwrap().get(&key("auth")),
            Some(&Value::from("t0k3n"))
        );
    }
}

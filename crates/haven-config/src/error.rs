use std::path::PathBuf;
use thiserror::Error;

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading and expanding YAML configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// A tag this loader does not implement, such as `!badtag`.
    #[error("unknown tag {tag} in {path}")]
    UnknownTag { tag: String, path: PathBuf },

    #[error("tag {tag} needs a string argument")]
    TagArgument { tag: String },

    #[error("secret {0:?} not found in secrets.yaml")]
    SecretNotFound(String),

    #[error("environment variable {0:?} not set")]
    EnvVarNotSet(String),

    #[error("circular include of {path}")]
    CircularInclude { path: PathBuf },

    #[error("include directory not found: {0}")]
    MissingDirectory(PathBuf),

    #[error("invalid {section:?} section: {reason}")]
    InvalidSection { section: String, reason: String },
}

//! Dispatch configuration with TOML support
//!
//! Instance capacity and restart policy are usually set by the runtime
//! integration; a TOML file lets deployments override them without code
//! changes. Missing keys fall back to defaults.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

/// Standard config file search paths
const CONFIG_PATHS: &[&str] = &["runpool.toml", "./config/runpool.toml"];

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Controls whether a file change restarts instances that are already
/// serving. Consulted by the owning pool, never enforced by the instance
/// itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum FileChangeRestartPolicy {
    /// Always restart instances.
    #[default]
    Always,
    /// Restart instances that have received at least one request.
    AfterFirstRequest,
    /// Never restart instances.
    Never,
}

/// A change observed in the module configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigChange {
    LibrariesChanged,
    SkipFilesChanged,
    HandlersChanged,
    InboundServicesChanged,
    EnvVariablesChanged,
    ErrorHandlersChanged,
    NobuildFilesChanged,
}

/// Capacity and restart settings applied to every instance a factory
/// creates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceConfig {
    /// Maximum concurrent requests per instance. 1 for runtimes that do
    /// not support concurrent requests.
    pub max_concurrent_requests: usize,
    /// Maximum background threads per instance. 0 for runtimes that do
    /// not support background work.
    pub max_background_threads: usize,
    pub restart_policy: FileChangeRestartPolicy,
    /// Directories whose changes should restart instances, in addition to
    /// the application root.
    pub restart_directories: Vec<PathBuf>,
}

impl Default for InstanceConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: 1,
            max_background_threads: 0,
            restart_policy: FileChangeRestartPolicy::default(),
            restart_directories: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub instance: InstanceConfig,
}

impl DispatchConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(raw)?)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    /// Load configuration from the first file found, or defaults if none.
    ///
    /// Checks the `RUNPOOL_CONFIG` environment variable, then the standard
    /// search paths.
    pub fn load() -> Result<Self, ConfigError> {
        if let Some(path) = Self::find_config_file() {
            info!(?path, "Loading configuration from file");
            return Self::from_file(&path);
        }
        Ok(Self::default())
    }

    fn find_config_file() -> Option<PathBuf> {
        if let Ok(path) = env::var("RUNPOOL_CONFIG") {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        for path in CONFIG_PATHS {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }

        None
    }
}

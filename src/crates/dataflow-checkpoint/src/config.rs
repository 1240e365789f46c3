//! Checkpointing configuration
//!
//! Settings are read from environment variables named `{PREFIX}{FIELD}`; the default
//! prefix is [`DEFAULT_ENV_PREFIX`]:
//!
//! | Variable | Field | Default |
//! |---|---|---|
//! | `DFCP_INSTANCE_NAME` | `instance_name` | *(required)* |
//! | `DFCP_STORAGE_DIR` | `storage` | in-memory |
//! | `DFCP_COMMAND_BUFFER` | `command_buffer` | 64 |
//! | `DFCP_RETAINED_CHECKPOINTS` | `retained_checkpoints` | 16 |

use crate::error::{CheckpointError, Result};
use crate::service::DEFAULT_RETAINED_CHECKPOINTS;
use crate::storage::{CheckpointStorage, FileCheckpointStorage, InMemoryCheckpointStorage};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;

pub const DEFAULT_ENV_PREFIX: &str = "DFCP_";

/// Default capacity of an instance actor's command channel
pub const DEFAULT_COMMAND_BUFFER: usize = 64;

/// Where checkpoints are persisted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum StorageBackend {
    #[default]
    Memory,
    Directory(PathBuf),
}

impl StorageBackend {
    /// Open the configured provider
    pub async fn open(&self) -> Result<Arc<dyn CheckpointStorage>> {
        let storage: Arc<dyn CheckpointStorage> = match self {
            StorageBackend::Memory => Arc::new(InMemoryCheckpointStorage::new()),
            StorageBackend::Directory(dir) => Arc::new(FileCheckpointStorage::open(dir).await?),
        };
        Ok(storage)
    }
}

/// Settings for one instance's checkpoint service and actor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointingConfig {
    pub instance_name: String,
    #[serde(default)]
    pub storage: StorageBackend,
    /// Capacity of the actor's command channel
    pub command_buffer: usize,
    /// Own checkpoint ids the service remembers locally
    pub retained_checkpoints: usize,
}

impl Default for CheckpointingConfig {
    fn default() -> Self {
        Self {
            instance_name: String::new(),
            storage: StorageBackend::Memory,
            command_buffer: DEFAULT_COMMAND_BUFFER,
            retained_checkpoints: DEFAULT_RETAINED_CHECKPOINTS,
        }
    }
}

impl CheckpointingConfig {
    pub fn new(instance_name: impl Into<String>) -> Self {
        Self {
            instance_name: instance_name.into(),
            ..Self::default()
        }
    }

    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage = StorageBackend::Directory(dir.into());
        self
    }

    pub fn with_command_buffer(mut self, capacity: usize) -> Self {
        self.command_buffer = capacity;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.instance_name.trim().is_empty() {
            return Err(CheckpointError::Config(
                "instance_name must not be empty".to_string(),
            ));
        }
        if self.command_buffer == 0 {
            return Err(CheckpointError::Config(
                "command_buffer must be greater than zero".to_string(),
            ));
        }
        if self.retained_checkpoints < 2 {
            return Err(CheckpointError::Config(
                "retained_checkpoints must be at least 2".to_string(),
            ));
        }
        if let StorageBackend::Directory(dir) = &self.storage {
            if dir.as_os_str().is_empty() {
                return Err(CheckpointError::Config(
                    "storage directory must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }

    /// Load from `{prefix}*` environment variables; unset variables keep their defaults
    pub fn from_env(prefix: &str) -> Result<Self> {
        let mut config = Self::default();
        if let Some(name) = get_env(&format!("{prefix}INSTANCE_NAME"))? {
            config.instance_name = name;
        }
        if let Some(dir) = get_env(&format!("{prefix}STORAGE_DIR"))? {
            config.storage = StorageBackend::Directory(PathBuf::from(dir));
        }
        if let Some(capacity) = get_env_parse(&format!("{prefix}COMMAND_BUFFER"))? {
            config.command_buffer = capacity;
        }
        if let Some(retained) = get_env_parse(&format!("{prefix}RETAINED_CHECKPOINTS"))? {
            config.retained_checkpoints = retained;
        }
        Ok(config)
    }

    /// Override every setting `other` changes from the default
    pub fn merge(&mut self, other: Self) -> &mut Self {
        let defaults = Self::default();
        if !other.instance_name.is_empty() {
            self.instance_name = other.instance_name;
        }
        if other.storage != defaults.storage {
            self.storage = other.storage;
        }
        if other.command_buffer != defaults.command_buffer {
            self.command_buffer = other.command_buffer;
        }
        if other.retained_checkpoints != defaults.retained_checkpoints {
            self.retained_checkpoints = other.retained_checkpoints;
        }
        self
    }

    /// Load from the environment over the defaults and validate
    pub fn from_env_with_defaults(prefix: &str) -> Result<Self> {
        let config = Self::from_env(prefix)?;
        config.validate()?;
        Ok(config)
    }
}

fn get_env(key: &str) -> Result<Option<String>> {
    match env::var(key) {
        Ok(val) => Ok(Some(val)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(env::VarError::NotUnicode(_)) => Err(CheckpointError::Config(format!(
            "Environment variable {} contains invalid UTF-8",
            key
        ))),
    }
}

fn get_env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match get_env(key)? {
        Some(val) => {
            let parsed = val.trim().parse::<T>().map_err(|e| {
                CheckpointError::Config(format!(
                    "Failed to parse environment variable {}: {}",
                    key, e
                ))
            })?;
            Ok(Some(parsed))
        }
        None => Ok(None),
    }
}

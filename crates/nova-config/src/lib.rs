//! Configuration for the workspace model, loaded from TOML.
//!
//! ```toml
//! top_level_text_threshold = 4096
//! version_cache_capacity = 2
//!
//! [storage]
//! directory = "/tmp/nova-spill"
//! compression_threshold = 65536
//!
//! [memory]
//! total_budget_bytes = 1073741824
//! sample_process_rss = false
//!
//! [memory.overrides]
//! source_text = 268435456
//!
//! [logging]
//! level = "nova.cache=debug,info"
//! json = false
//! ```
//!
//! Every key is optional; unknown keys are rejected.

mod logging;

use std::path::{Path, PathBuf};

use nova_memory::{MemoryBudget, MemoryBudgetOverrides, MemoryManagerOptions};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use logging::{global_log_buffer, init_tracing, LogBuffer, LoggingConfig};

/// Text length above which an edited document is assumed to have changed
/// its top-level declarations rather than being reparsed to find out.
pub const DEFAULT_TOP_LEVEL_TEXT_THRESHOLD: usize = 4096;

pub const DEFAULT_VERSION_CACHE_CAPACITY: usize = 2;

/// Spilled texts at least this large are zstd-compressed.
pub const DEFAULT_COMPRESSION_THRESHOLD: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WorkspaceModelConfig {
    pub top_level_text_threshold: usize,
    pub version_cache_capacity: usize,
    pub storage: StorageConfig,
    pub memory: MemoryConfig,
    pub logging: LoggingConfig,
}

impl Default for WorkspaceModelConfig {
    fn default() -> Self {
        Self {
            top_level_text_threshold: DEFAULT_TOP_LEVEL_TEXT_THRESHOLD,
            version_cache_capacity: DEFAULT_VERSION_CACHE_CAPACITY,
            storage: StorageConfig::default(),
            memory: MemoryConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Where spilled document text goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Directory for spill files. Spilled text stays in process memory
    /// (serialized) when unset.
    pub directory: Option<PathBuf>,
    pub compression_threshold: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: None,
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MemoryConfig {
    /// Total budget. Derived from system memory when unset.
    pub total_budget_bytes: Option<u64>,
    pub overrides: MemoryBudgetOverrides,
    pub sample_process_rss: bool,
}

impl MemoryConfig {
    pub fn budget(&self) -> MemoryBudget {
        let base = match self.total_budget_bytes {
            Some(total) => MemoryBudget::from_total(total),
            None => MemoryBudget::default_for_system(),
        };
        base.apply_overrides(self.overrides)
    }

    pub fn manager_options(&self) -> MemoryManagerOptions {
        MemoryManagerOptions {
            sample_process_rss: self.sample_process_rss,
            ..MemoryManagerOptions::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse toml config: {message}")]
    Toml {
        path: Option<PathBuf>,
        message: String,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl WorkspaceModelConfig {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&text, Some(path))
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        Self::parse(text, None)
    }

    fn parse(text: &str, path: Option<&Path>) -> Result<Self, ConfigError> {
        // `toml::de::Error`'s `Display` includes a source snippet; keep only the message.
        let config: Self = toml::from_str(text).map_err(|err| ConfigError::Toml {
            path: path.map(Path::to_path_buf),
            message: err.message().to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.top_level_text_threshold == 0 {
            return Err(ConfigError::Invalid(
                "top_level_text_threshold must be greater than zero".into(),
            ));
        }
        if self.version_cache_capacity == 0 {
            return Err(ConfigError::Invalid(
                "version_cache_capacity must be greater than zero".into(),
            ));
        }
        if self.memory.total_budget_bytes == Some(0) {
            return Err(ConfigError::Invalid(
                "memory.total_budget_bytes must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string(self).map_err(|err| ConfigError::Invalid(err.to_string()))
    }
}

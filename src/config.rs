use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration, optionally loaded from a TOML file.
///
/// Every field has a built-in default, so an init started by the kernel with
/// no arguments runs with exactly these values.
#[derive(Debug, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct InitConfig {
    pub devices: DevicesConfig,
    pub target: TargetConfig,
    pub spawn_backoff: BackoffConfig,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DevicesConfig {
    pub dir: PathBuf,
    pub dir_mode: u32,
    pub console: PathBuf,
    pub console_major: u64,
    pub console_minor: u64,
    /// Extra character nodes created after the console.
    pub nodes: Vec<NodeConfig>,
}

#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub path: PathBuf,
    pub major: u64,
    pub minor: u64,
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TargetConfig {
    pub program: PathBuf,
}

/// Delay schedule used when `fork` itself fails.
#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct BackoffConfig {
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

// --- Default implementations ---

impl Default for DevicesConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("/dev"),
            dir_mode: 0,
            console: PathBuf::from("/dev/console"),
            console_major: 1,
            console_minor: 0,
            nodes: Vec::new(),
        }
    }
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("/bin/lsh"),
        }
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: 10,
            max_delay_ms: 5000,
        }
    }
}

/// Errors that can occur while loading the config file.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
        }
    }
}

impl InitConfig {
    /// Parse a config file strictly.
    pub fn from_file(path: &Path) -> Result<InitConfig, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_path_buf(),
            source: e,
        })?;
        toml::from_str(&contents).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Load config from `path`, or the built-in defaults.
    ///
    /// PID 1 cannot afford to abort over a bad config file, so any error is
    /// logged and the defaults are used instead.
    pub fn load(path: Option<&Path>) -> InitConfig {
        let Some(path) = path else {
            return InitConfig::default();
        };
        match InitConfig::from_file(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!(error = %e, "using built-in defaults");
                InitConfig::default()
            }
        }
    }
}

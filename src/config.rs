//! Engine Configuration
//!
//! Defaults for new sessions, command execution, history and suggestions.
//! Loaded from TOML, JSON or YAML depending on the file extension.

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

/// Environment variable naming an explicit config file
pub const CONFIG_ENV: &str = "SHELLPILOT_CONFIG";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Parse error in {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Unsupported config format: {0}")]
    UnsupportedFormat(PathBuf),
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub session: SessionConfig,
    pub command: CommandConfig,
    pub history: HistoryConfig,
    pub suggestions: SuggestionConfig,
    pub registry: RegistryConfig,
}

/// Defaults applied by `SessionManager::start`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Shell path or name; platform default when unset
    pub shell: Option<String>,
    pub args: Vec<String>,
    /// Working directory; the current directory when unset
    pub cwd: Option<PathBuf>,
    pub rows: u16,
    pub cols: u16,
    /// Extra environment for the shell
    pub env: HashMap<String, String>,
    /// Value of TERM for the shell
    pub term: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            shell: None,
            args: Vec::new(),
            cwd: None,
            rows: 24,
            cols: 80,
            env: HashMap::new(),
            term: "xterm-256color".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    pub timeout_ms: u64,
    /// Send Ctrl-C to the shell when a command times out
    pub interrupt_on_timeout: bool,
    /// How many abandoned sentinels are remembered
    pub abandoned_limit: usize,
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 30_000,
            interrupt_on_timeout: true,
            abandoned_limit: 8,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub limit: usize,
    /// How many recent commands are handed to the suggestion collaborator
    pub suggestion_window: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            limit: 1000,
            suggestion_window: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuggestionConfig {
    pub timeout_ms: u64,
}

impl Default for SuggestionConfig {
    fn default() -> Self {
        Self { timeout_ms: 2_000 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub max_sessions: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { max_sessions: 10 }
    }
}

impl EngineConfig {
    /// Load from a file, choosing the parser by extension
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).await.map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        let parse_error = |message: String| ConfigError::Parse {
            path: path.to_path_buf(),
            message,
        };

        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => toml::from_str(&content).map_err(|e| parse_error(e.to_string()))?,
            Some("json") => serde_json::from_str(&content).map_err(|e| parse_error(e.to_string()))?,
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str(&content).map_err(|e| parse_error(e.to_string()))?
            }
            _ => return Err(ConfigError::UnsupportedFormat(path.to_path_buf())),
        };

        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// `$SHELLPILOT_CONFIG`, then the per-user config file, then defaults
    pub async fn load_default() -> Result<Self, ConfigError> {
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            return Self::load(Path::new(&path)).await;
        }

        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path).await,
            _ => {
                debug!("No configuration file found, using defaults");
                Ok(Self::default())
            }
        }
    }

    /// `<config_dir>/shellpilot/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("shellpilot").join("config.toml"))
    }
}

/// The platform's default interactive shell
pub fn default_shell() -> String {
    #[cfg(windows)]
    {
        std::env::var("COMSPEC").unwrap_or_else(|_| "cmd.exe".to_string())
    }
    #[cfg(not(windows))]
    {
        std::env::var("SHELL")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| "/bin/sh".to_string())
    }
}

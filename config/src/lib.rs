//! Launch configuration, read once at startup from `~/.ember/config.toml`.
//!
//! Every key is optional. A missing file means built-in defaults; a broken
//! one is reported and the server still starts on defaults.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use ember_lsp::EngineOptions;
use ember_types::Settings;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EmberConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    /// Client settings used until (or unless) the client sends its own.
    pub defaults: Option<Settings>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ServerConfig {
    /// `tracing` filter used when `RUST_LOG` is unset.
    pub log: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct TimingConfig {
    pub parse_debounce_ms: Option<u64>,
    pub configuration_fallback_ms: Option<u64>,
}

impl EmberConfig {
    /// Load `~/.ember/config.toml`. `Ok(None)` when there is no home
    /// directory or no file.
    pub fn load() -> Result<Option<Self>, ConfigError> {
        let Some(path) = config_path() else {
            return Ok(None);
        };
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path).map(Some)
    }

    fn parse(content: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    #[must_use]
    pub fn path() -> Option<PathBuf> {
        config_path()
    }

    /// Engine options with configured values laid over the built-in ones.
    #[must_use]
    pub fn engine_options(&self) -> EngineOptions {
        let mut options = EngineOptions::default();
        if let Some(ms) = self.timing.parse_debounce_ms {
            options.parse_debounce = Duration::from_millis(ms);
        }
        if let Some(ms) = self.timing.configuration_fallback_ms {
            options.configuration_fallback = Duration::from_millis(ms);
        }
        if let Some(defaults) = &self.defaults {
            options.default_settings = defaults.clone();
        }
        options
    }

    #[must_use]
    pub fn log_filter(&self) -> Option<&str> {
        self.server.log.as_deref()
    }
}

pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".ember").join("config.toml"))
}

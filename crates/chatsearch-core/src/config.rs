//! Persisted config (embedding provider, credentials, search defaults) in the app data directory.
//!
//! Values in `config.toml` can be overridden from the environment; see [Config::apply_env].

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::app_data;

const CONFIG_FILENAME: &str = "config.toml";

pub const ENV_API_KEY: &str = "OPENAI_API_KEY";
pub const ENV_ORGANIZATION: &str = "OPENAI_ORGANIZATION";
pub const ENV_PROJECT: &str = "OPENAI_PROJECT";
pub const ENV_INDEX_PATH: &str = "CHATSEARCH_INDEX";

pub const DEFAULT_OPENAI_MODEL: &str = "text-embedding-ada-002";
pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_MAX_TOKENS: usize = 8000;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_THRESHOLD: f32 = 0.8;
pub const DEFAULT_TOP_K: usize = 5;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where the index lives. Defaults to `chatindex.csv` in the app data directory.
    pub index_path: Option<String>,
    pub embedding: EmbeddingConfig,
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    OpenAi,
    Ollama,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub provider: Provider,
    /// Model name. `None` picks the provider's default.
    pub model: Option<String>,
    /// Base URL of the service. `None` picks the provider's default.
    pub base_url: Option<String>,
    /// Prefer `OPENAI_API_KEY` over storing the key here.
    pub api_key: Option<String>,
    pub organization: Option<String>,
    pub project: Option<String>,
    pub batch_size: usize,
    pub max_tokens: usize,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: Provider::default(),
            model: None,
            base_url: None,
            api_key: None,
            organization: None,
            project: None,
            batch_size: DEFAULT_BATCH_SIZE,
            max_tokens: DEFAULT_MAX_TOKENS,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub threshold: f32,
    pub top_k: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            top_k: DEFAULT_TOP_K,
        }
    }
}

impl Config {
    /// Read config from a specific file. Missing file yields the default config.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let s = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::Read(path.to_path_buf(), e)),
        };
        toml::from_str(&s).map_err(|e| ConfigError::Parse(path.to_path_buf(), e))
    }

    /// Overlay values from the environment. `lookup` is normally `std::env::var(..).ok()`.
    /// Empty values are ignored.
    pub fn apply_env(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(key) = get(ENV_API_KEY) {
            self.embedding.api_key = Some(key);
        }
        if let Some(org) = get(ENV_ORGANIZATION) {
            self.embedding.organization = Some(org);
        }
        if let Some(project) = get(ENV_PROJECT) {
            self.embedding.project = Some(project);
        }
        if let Some(path) = get(ENV_INDEX_PATH) {
            self.index_path = Some(path);
        }
        self
    }

    /// Resolved index location: explicit setting first, then the app data directory.
    pub fn index_path(&self) -> Result<PathBuf, ConfigError> {
        match self.index_path.as_deref().filter(|s| !s.is_empty()) {
            Some(p) => Ok(PathBuf::from(p)),
            None => app_data::default_index_path().ok_or(ConfigError::NoDataDir),
        }
    }
}

/// Path of `config.toml` in the app data directory.
pub fn config_path() -> Option<PathBuf> {
    app_data::app_data_dir().map(|dir| dir.join(CONFIG_FILENAME))
}

/// Load config from the app data directory and overlay the process environment.
/// Returns default config (plus environment) if the file is missing or invalid.
pub fn load_config() -> Config {
    let config = match config_path() {
        Some(path) => Config::load_from(&path).unwrap_or_else(|e| {
            tracing::warn!("ignoring config: {e}");
            Config::default()
        }),
        None => Config::default(),
    };
    config.apply_env(|key| std::env::var(key).ok())
}

/// Save config to the app data directory.
pub fn save_config(config: &Config) -> Result<(), ConfigError> {
    let path = config_path().ok_or(ConfigError::NoDataDir)?;
    let s = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;
    std::fs::write(&path, s).map_err(ConfigError::Write)
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("could not determine app data directory")]
    NoDataDir,
    #[error("failed to read config {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("invalid config {0}: {1}")]
    Parse(PathBuf, toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(toml::ser::Error),
    #[error("failed to write config: {0}")]
    Write(std::io::Error),
}

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;
use crate::types::ProviderId;

/// Root configuration for commcoach.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub providers: ProvidersConfig,
    pub router: RouterConfig,
}

impl Config {
    /// Get the config block for a provider.
    pub fn provider(&self, id: ProviderId) -> &ProviderConfig {
        match id {
            ProviderId::Gemini => &self.providers.gemini,
            ProviderId::Ollama => &self.providers.ollama,
            ProviderId::OpenRouter => &self.providers.openrouter,
        }
    }

    /// Whether the credential (or, for the self-hosted tier, the base URL)
    /// needed to reach a provider is present.
    pub fn is_configured(&self, id: ProviderId) -> bool {
        let p = self.provider(id);
        match id {
            ProviderId::Ollama => p.api_base.as_deref().is_some_and(|b| !b.is_empty()),
            ProviderId::Gemini | ProviderId::OpenRouter => !p.api_key.is_empty(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProvidersConfig {
    pub gemini: ProviderConfig,
    pub ollama: ProviderConfig,
    pub openrouter: ProviderConfig,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            gemini: ProviderConfig::with_model("gemini-2.0-flash", 30),
            ollama: ProviderConfig::with_model("llama3.1:8b", 60),
            openrouter: ProviderConfig::with_model("meta-llama/llama-3.1-8b-instruct", 30),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderConfig {
    pub api_key: String,
    pub api_base: Option<String>,
    pub model: String,
    pub timeout_secs: u64,
}

impl ProviderConfig {
    fn with_model(model: &str, timeout_secs: u64) -> Self {
        Self {
            api_key: String::new(),
            api_base: None,
            model: model.to_string(),
            timeout_secs,
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self::with_model("", 30)
    }
}

/// Circuit-breaker and quota settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RouterConfig {
    pub failure_threshold: u32,
    pub reset_timeout_secs: u64,
    pub rate_limit_per_minute: usize,
    pub rate_limit_per_day: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            reset_timeout_secs: 60,
            rate_limit_per_minute: 15,
            rate_limit_per_day: 1500,
        }
    }
}

// ====== Config loading/saving ======

/// Load configuration from environment variables.
///
/// Priority:
/// 1. `COMMCOACH_CONFIG` env var: full JSON config
/// 2. File (`config_path` or `~/.commcoach/config.json`) with individual
///    env vars merged on top
pub fn load_config_from_env(config_path: Option<&Path>) -> Config {
    if let Ok(json) = std::env::var("COMMCOACH_CONFIG") {
        match serde_json::from_str::<Config>(&json) {
            Ok(config) => return config,
            Err(e) => {
                tracing::warn!("Failed to parse COMMCOACH_CONFIG: {}", e);
            }
        }
    }

    let mut cfg = load_config(config_path);
    apply_env_overrides(&mut cfg);
    cfg
}

fn non_empty_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn apply_env_overrides(cfg: &mut Config) {
    // Gemini (either variable name is accepted)
    if let Some(v) = non_empty_var("GEMINI_API_KEY").or_else(|| non_empty_var("GOOGLE_API_KEY")) {
        cfg.providers.gemini.api_key = v;
    }
    if let Some(v) = non_empty_var("GEMINI_MODEL") {
        cfg.providers.gemini.model = v;
    }

    // Ollama
    if let Some(v) = non_empty_var("OLLAMA_BASE_URL") {
        cfg.providers.ollama.api_base = Some(v);
    }
    if let Some(v) = non_empty_var("OLLAMA_API_KEY") {
        cfg.providers.ollama.api_key = v;
    }
    if let Some(v) = non_empty_var("OLLAMA_MODEL") {
        cfg.providers.ollama.model = v;
    }

    // OpenRouter
    if let Some(v) = non_empty_var("OPENROUTER_API_KEY") {
        cfg.providers.openrouter.api_key = v;
    }
    if let Some(v) = non_empty_var("OPENROUTER_MODEL") {
        cfg.providers.openrouter.model = v;
    }
}

/// Get the default configuration file path.
pub fn get_config_path() -> PathBuf {
    get_data_dir().join("config.json")
}

/// Get the commcoach data directory.
pub fn get_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".commcoach")
}

/// Read and parse one config file.
pub fn read_config_file(path: &Path) -> Result<Config, ConfigError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        Err(e) => return Err(e.into()),
    };
    Ok(serde_json::from_str(&content)?)
}

/// Load configuration from file or create default.
pub fn load_config(config_path: Option<&Path>) -> Config {
    let path = config_path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(get_config_path);

    match read_config_file(&path) {
        Ok(config) => config,
        Err(ConfigError::NotFound(_)) => Config::default(),
        Err(e) => {
            tracing::warn!("Failed to load config from {}: {}", path.display(), e);
            tracing::warn!("Using default configuration.");
            Config::default()
        }
    }
}

/// Save configuration to file.
pub fn save_config(config: &Config, config_path: Option<&Path>) -> Result<(), ConfigError> {
    let path = config_path
        .map(|p| p.to_path_buf())
        .unwrap_or_else(get_config_path);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let json = serde_json::to_string_pretty(config)?;
    std::fs::write(&path, json)?;
    Ok(())
}

use std::path::PathBuf;

use crate::types::ProviderId;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    #[error("Config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Failure of a single adapter call. The router turns every variant into
/// "try the next provider".
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// The request URL is stripped before wrapping.
    #[error("Transport error: {0}")]
    Transport(reqwest::Error),

    #[error("Authentication failed ({status}): {message}")]
    Auth { status: u16, message: String },

    #[error("Upstream error ({status}): {message}")]
    Upstream { status: u16, message: String },

    #[error("Structured output is not valid JSON: {0}")]
    SchemaParse(String),

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Provider {0} is not configured")]
    NotConfigured(ProviderId),
}

impl From<reqwest::Error> for ProviderError {
    fn from(e: reqwest::Error) -> Self {
        ProviderError::Transport(e.without_url())
    }
}

impl ProviderError {
    /// Classify a non-2xx HTTP status.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            401 | 403 => ProviderError::Auth { status, message },
            _ => ProviderError::Upstream { status, message },
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("All AI providers failed (attempted: {}): {last_error}", format_attempted(.attempted))]
    AllProvidersExhausted {
        attempted: Vec<ProviderId>,
        last_error: String,
    },

    #[error("Invalid generation config: {0}")]
    InvalidConfig(String),
}

fn format_attempted(attempted: &[ProviderId]) -> String {
    if attempted.is_empty() {
        return "none".to_string();
    }
    attempted
        .iter()
        .map(|p| p.to_string())
        .collect::<Vec<_>>()
        .join(" -> ")
}

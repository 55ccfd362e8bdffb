pub mod gemini;
pub mod ollama;
pub mod openrouter;
pub mod pricing;

use std::sync::Arc;
use async_trait::async_trait;

use crate::config::Config;
use crate::error::ProviderError;
use crate::types::{GenerationConfig, Prompt, ProviderId, ProviderOutput, StructuredOutput};

/// Trait for AI backends the router can fail over between.
///
/// Adapters never retry: one call, one upstream request. Each request carries
/// its own timeout so a slow backend only costs its own attempt.
#[async_trait]
pub trait AiProvider: Send + Sync {
    /// Which tier this adapter serves.
    fn id(&self) -> ProviderId;

    /// Model used when the caller gives no usable hint.
    fn default_model(&self) -> &str;

    /// Whether a caller-supplied model name means something to this backend.
    fn accepts_model(&self, model: &str) -> bool;

    /// Whether the credential / endpoint needed for a call is present.
    fn is_configured(&self) -> bool {
        true
    }

    /// Generate free-text content.
    async fn generate_content(
        &self,
        model: &str,
        prompt: &Prompt,
        config: &GenerationConfig,
    ) -> Result<ProviderOutput, ProviderError>;

    /// Generate content constrained to a JSON schema.
    async fn generate_structured_content(
        &self,
        model: &str,
        prompt: &Prompt,
        schema: &serde_json::Value,
        config: &GenerationConfig,
    ) -> Result<StructuredOutput, ProviderError>;

    /// Cheap reachability probe. Never errors; any failure reads as `false`.
    async fn is_available(&self) -> bool;

    /// Pick the model for a request: the caller's hint if this backend
    /// understands it, otherwise the adapter default.
    fn resolve_model<'a>(&'a self, config: &'a GenerationConfig) -> &'a str {
        match config.model.as_deref() {
            Some(m) if !m.is_empty() && self.accepts_model(m) => m,
            _ => self.default_model(),
        }
    }
}

/// Build an adapter for every provider whose credentials are configured.
pub fn create_providers(config: &Config) -> Vec<Arc<dyn AiProvider>> {
    let mut providers: Vec<Arc<dyn AiProvider>> = Vec::new();

    if config.is_configured(ProviderId::Gemini) {
        providers.push(Arc::new(gemini::GeminiProvider::from_config(&config.providers.gemini)));
    }
    if config.is_configured(ProviderId::Ollama) {
        providers.push(Arc::new(ollama::OllamaProvider::from_config(&config.providers.ollama)));
    }
    if config.is_configured(ProviderId::OpenRouter) {
        providers.push(Arc::new(openrouter::OpenRouterProvider::from_config(
            &config.providers.openrouter,
        )));
    }

    providers
}

/// Remove a surrounding Markdown code fence (```json ... ```), if any.
pub fn strip_code_fences(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the info string ("json", "JSON", ...) on the opening line
    let body = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

/// Parse model output as JSON after removing code-fence markup.
pub fn parse_json_output(text: &str) -> Result<serde_json::Value, ProviderError> {
    let cleaned = strip_code_fences(text);
    serde_json::from_str(cleaned).map_err(|e| {
        ProviderError::SchemaParse(format!(
            "{} (response started with {:?})",
            e,
            crate::util::preview(cleaned, 80)
        ))
    })
}

/// Instructions appended to the prompt for backends without native
/// constrained decoding.
pub fn schema_instructions(schema: &serde_json::Value) -> String {
    let schema_text =
        serde_json::to_string_pretty(schema).unwrap_or_else(|_| schema.to_string());
    format!(
        "\n\nRespond ONLY with a single JSON value that conforms to this JSON schema. \
         Do not include explanations or Markdown.\n\nJSON schema:\n{schema_text}"
    )
}

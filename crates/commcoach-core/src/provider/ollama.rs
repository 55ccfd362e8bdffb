use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::types::{GenerationConfig, Prompt, ProviderId, ProviderOutput, StructuredOutput, TokenUsage};
use crate::util::http;

use super::AiProvider;

/// Open-weight model families commonly pulled into Ollama.
const OPEN_MODEL_FAMILIES: &[&str] = &[
    "llama", "codellama", "tinyllama", "mistral", "mixtral", "gemma", "qwen", "phi", "deepseek",
    "starcoder", "command-r", "nomic", "vicuna", "orca",
];

/// Self-hosted Ollama server (free, unlimited tier).
pub struct OllamaProvider {
    api_key: String,
    api_base: String,
    default_model: String,
    timeout: Duration,
}

impl OllamaProvider {
    pub fn new(api_key: String, api_base: String, default_model: String, timeout: Duration) -> Self {
        Self {
            api_key,
            api_base: api_base.trim_end_matches('/').to_string(),
            default_model,
            timeout,
        }
    }

    pub fn from_config(cfg: &ProviderConfig) -> Self {
        Self::new(
            cfg.api_key.clone(),
            cfg.api_base.clone().unwrap_or_default(),
            cfg.model.clone(),
            cfg.timeout(),
        )
    }

    fn build_body(&self, model: &str, prompt: &Prompt, config: &GenerationConfig) -> serde_json::Value {
        let messages = prompt.to_messages(config.system_instruction.as_deref());

        let mut options = json!({
            "temperature": config.temperature_or_default(),
            "num_predict": config.max_output_tokens_or_default(),
        });
        if let Some(top_p) = config.top_p {
            options["top_p"] = json!(top_p);
        }
        if let Some(top_k) = config.top_k {
            options["top_k"] = json!(top_k);
        }

        json!({
            "model": model,
            "messages": messages,
            "stream": false,
            "options": options,
        })
    }

    /// A reverse proxy in front of Ollama may require a bearer token.
    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            request
        } else {
            request.bearer_auth(&self.api_key)
        }
    }

    async fn send(&self, body: &serde_json::Value) -> Result<(String, TokenUsage), ProviderError> {
        let url = format!("{}/api/chat", self.api_base);
        debug!("Ollama request to {} with model {}", url, body["model"]);

        let response = self
            .authorize(http::client().post(&url))
            .timeout(self.timeout)
            .json(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = http::error_body(response).await;
            return Err(ProviderError::from_status(status.as_u16(), message));
        }

        let data: serde_json::Value = response.json().await?;
        parse_response(&data)
    }
}

#[async_trait]
impl AiProvider for OllamaProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Ollama
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn accepts_model(&self, model: &str) -> bool {
        let model = model.to_lowercase();
        if model.contains('/') || model.starts_with("gemini") {
            return false;
        }
        // Tagged names ("llama3.1:8b") are Ollama's; bare names must be a
        // known open-weight family or the configured default's family
        let default_family = self.default_model.split(':').next().unwrap_or_default();
        model.contains(':')
            || (!default_family.is_empty() && model.starts_with(&default_family.to_lowercase()))
            || OPEN_MODEL_FAMILIES.iter().any(|f| model.starts_with(f))
    }

    fn is_configured(&self) -> bool {
        !self.api_base.is_empty()
    }

    async fn generate_content(
        &self,
        model: &str,
        prompt: &Prompt,
        config: &GenerationConfig,
    ) -> Result<ProviderOutput, ProviderError> {
        if !self.is_configured() {
            return Err(ProviderError::NotConfigured(ProviderId::Ollama));
        }
        let body = self.build_body(model, prompt, config);
        let (text, usage) = self.send(&body).await?;

        Ok(ProviderOutput {
            text,
            model: model.to_string(),
            cost: 0.0,
            usage,
        })
    }

    async fn generate_structured_content(
        &self,
        model: &str,
        prompt: &Prompt,
        schema: &serde_json::Value,
        config: &GenerationConfig,
    ) -> Result<StructuredOutput, ProviderError> {
        if !self.is_configured() {
            return Err(ProviderError::NotConfigured(ProviderId::Ollama));
        }
        let mut body = self.build_body(model, prompt, config);
        body["format"] = schema.clone();

        let (text, usage) = self.send(&body).await?;
        let value = super::parse_json_output(&text)?;

        Ok(StructuredOutput {
            value,
            model: model.to_string(),
            cost: 0.0,
            usage,
        })
    }

    async fn is_available(&self) -> bool {
        if !self.is_configured() {
            return false;
        }
        let url = format!("{}/api/tags", self.api_base);
        match self
            .authorize(http::client().get(&url))
            .timeout(http::PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("Ollama availability probe failed: {}", e);
                false
            }
        }
    }
}

fn parse_response(data: &serde_json::Value) -> Result<(String, TokenUsage), ProviderError> {
    if let Some(err) = data.get("error").and_then(|v| v.as_str()) {
        return Err(ProviderError::Parse(err.to_string()));
    }

    let text = data
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|c| c.as_str())
        .ok_or_else(|| ProviderError::Parse("No message content in response".to_string()))?
        .to_string();

    let prompt_tokens = data.get("prompt_eval_count").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
    let completion_tokens = data.get("eval_count").and_then(|v| v.as_u64()).unwrap_or(0) as u32;

    Ok((
        text,
        TokenUsage {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        },
    ))
}

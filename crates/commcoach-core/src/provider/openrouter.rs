use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::types::{GenerationConfig, Prompt, ProviderId, ProviderOutput, StructuredOutput, TokenUsage};
use crate::util::http;

use super::{pricing, AiProvider};

const DEFAULT_API_BASE: &str = "https://openrouter.ai/api/v1";

/// OpenRouter aggregator (paid, metered tier). Speaks the OpenAI chat
/// completions format.
pub struct OpenRouterProvider {
    api_key: String,
    api_base: String,
    default_model: String,
    timeout: Duration,
}

impl OpenRouterProvider {
    pub fn new(api_key: String, api_base: Option<String>, default_model: String, timeout: Duration) -> Self {
        let base = api_base.unwrap_or_else(|| DEFAULT_API_BASE.to_string());
        Self {
            api_key,
            api_base: base.trim_end_matches('/').to_string(),
            default_model,
            timeout,
        }
    }

    pub fn from_config(cfg: &ProviderConfig) -> Self {
        Self::new(cfg.api_key.clone(), cfg.api_base.clone(), cfg.model.clone(), cfg.timeout())
    }

    /// Normalize model name for the API (strip the "openrouter/" prefix).
    fn normalize_model<'a>(&self, model: &'a str) -> &'a str {
        model.strip_prefix("openrouter/").unwrap_or(model)
    }

    fn build_body(&self, model: &str, prompt: &Prompt, config: &GenerationConfig) -> serde_json::Value {
        let messages = prompt.to_messages(config.system_instruction.as_deref());

        let mut body = json!({
            "model": self.normalize_model(model),
            "messages": messages,
            "max_tokens": config.max_output_tokens_or_default(),
            "temperature": config.temperature_or_default(),
        });
        if let Some(top_p) = config.top_p {
            body["top_p"] = json!(top_p);
        }
        if let Some(top_k) = config.top_k {
            body["top_k"] = json!(top_k);
        }
        body
    }

    async fn send(&self, body: &serde_json::Value) -> Result<ProviderOutput, ProviderError> {
        if self.api_key.is_empty() {
            return Err(ProviderError::NotConfigured(ProviderId::OpenRouter));
        }
        let url = format!("{}/chat/completions", self.api_base);
        debug!("OpenRouter request to {} with model {}", url, body["model"]);

        let response = http::client()
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("X-Title", "CommCoach AI")
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
        let requested = body["model"].as_str().unwrap_or(self.default_model.as_str());
        parse_openai_response(&data, requested)
    }
}

#[async_trait]
impl AiProvider for OpenRouterProvider {
    fn id(&self) -> ProviderId {
        ProviderId::OpenRouter
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn accepts_model(&self, model: &str) -> bool {
        // OpenRouter slugs are always "vendor/model"
        self.normalize_model(model).contains('/')
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn generate_content(
        &self,
        model: &str,
        prompt: &Prompt,
        config: &GenerationConfig,
    ) -> Result<ProviderOutput, ProviderError> {
        let body = self.build_body(model, prompt, config);
        self.send(&body).await
    }

    async fn generate_structured_content(
        &self,
        model: &str,
        prompt: &Prompt,
        schema: &serde_json::Value,
        config: &GenerationConfig,
    ) -> Result<StructuredOutput, ProviderError> {
        // Not every routed model supports constrained decoding, so the schema
        // travels in the prompt and the reply is parsed leniently.
        let prompt = prompt.with_appended(&super::schema_instructions(schema));
        let body = self.build_body(model, &prompt, config);
        let output = self.send(&body).await?;
        let value = super::parse_json_output(&output.text)?;

        Ok(StructuredOutput {
            value,
            model: output.model,
            cost: output.cost,
            usage: output.usage,
        })
    }

    async fn is_available(&self) -> bool {
        if self.api_key.is_empty() {
            return false;
        }
        let url = format!("{}/models", self.api_base);
        match http::client()
            .get(&url)
            .bearer_auth(&self.api_key)
            .timeout(http::PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("OpenRouter availability probe failed: {}", e);
                false
            }
        }
    }
}

/// Parse an OpenAI-format response, pricing it by the model that actually
/// served it.
pub fn parse_openai_response(data: &serde_json::Value, requested_model: &str) -> Result<ProviderOutput, ProviderError> {
    // OpenRouter reports some upstream failures inside a 200 body
    if let Some(err) = data.get("error") {
        let message = err
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown error")
            .to_string();
        let status = err.get("code").and_then(|v| v.as_u64()).unwrap_or(502) as u16;
        return Err(ProviderError::from_status(status, message));
    }

    let choice = data
        .get("choices")
        .and_then(|c| c.get(0))
        .ok_or_else(|| ProviderError::Parse("No choices in response".to_string()))?;

    let text = choice
        .get("message")
        .and_then(|m| m.get("content"))
        .and_then(|v| v.as_str())
        .ok_or_else(|| ProviderError::Parse("No message content in choice".to_string()))?
        .to_string();

    let model = data
        .get("model")
        .and_then(|v| v.as_str())
        .unwrap_or(requested_model)
        .to_string();

    let usage = match data.get("usage") {
        Some(u) => TokenUsage {
            prompt_tokens: u.get("prompt_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            completion_tokens: u
                .get("completion_tokens")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32,
            total_tokens: u.get("total_tokens").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        },
        None => TokenUsage::default(),
    };

    let cost = pricing::calculate_cost(&model, usage.prompt_tokens, usage.completion_tokens);

    Ok(ProviderOutput { text, model, cost, usage })
}

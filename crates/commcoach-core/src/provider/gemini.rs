use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use crate::config::ProviderConfig;
use crate::error::ProviderError;
use crate::types::{
    GenerationConfig, Message, Prompt, ProviderId, ProviderOutput, Role, StructuredOutput,
    TokenUsage,
};
use crate::util::http;

use super::AiProvider;

const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const API_KEY_HEADER: &str = "x-goog-api-key";

/// Google Gemini API provider (free, quota-limited tier).
pub struct GeminiProvider {
    api_key: String,
    api_base: String,
    default_model: String,
    timeout: Duration,
}

impl GeminiProvider {
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

    /// Normalize model name: strip "gemini/" and "models/" prefixes.
    fn normalize_model<'a>(&self, model: &'a str) -> &'a str {
        let model = model.strip_prefix("gemini/").unwrap_or(model);
        model.strip_prefix("models/").unwrap_or(model)
    }

    /// Convert messages to Gemini format. System turns are merged into the
    /// separate `systemInstruction` field.
    fn convert_messages(
        &self,
        messages: &[Message],
    ) -> (Option<serde_json::Value>, Vec<serde_json::Value>) {
        let mut system_parts = Vec::new();
        let mut contents = Vec::new();

        for msg in messages {
            match msg.role {
                Role::System => system_parts.push(json!({"text": msg.content})),
                Role::User => contents.push(json!({
                    "role": "user",
                    "parts": [{"text": msg.content}]
                })),
                Role::Assistant => contents.push(json!({
                    "role": "model",
                    "parts": [{"text": msg.content}]
                })),
            }
        }

        let system_instruction = if system_parts.is_empty() {
            None
        } else {
            Some(json!({"parts": system_parts}))
        };
        (system_instruction, contents)
    }

    fn generation_config(&self, config: &GenerationConfig) -> serde_json::Value {
        let mut generation = json!({
            "maxOutputTokens": config.max_output_tokens_or_default(),
            "temperature": config.temperature_or_default(),
        });
        if let Some(top_p) = config.top_p {
            generation["topP"] = json!(top_p);
        }
        if let Some(top_k) = config.top_k {
            generation["topK"] = json!(top_k);
        }
        generation
    }

    fn build_body(&self, prompt: &Prompt, config: &GenerationConfig) -> serde_json::Value {
        let messages = prompt.to_messages(config.system_instruction.as_deref());
        let (system_instruction, contents) = self.convert_messages(&messages);

        let mut body = json!({
            "contents": contents,
            "generationConfig": self.generation_config(config),
        });
        if let Some(system) = system_instruction {
            body["systemInstruction"] = system;
        }
        body
    }

    async fn send(&self, model: &str, body: &serde_json::Value) -> Result<(String, TokenUsage), ProviderError> {
        let model_name = self.normalize_model(model);
        let url = format!("{}/models/{}:generateContent", self.api_base, model_name);

        debug!("Gemini request with model {}", model_name);

        let response = http::client()
            .post(&url)
            .header(API_KEY_HEADER, &self.api_key)
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
impl AiProvider for GeminiProvider {
    fn id(&self) -> ProviderId {
        ProviderId::Gemini
    }

    fn default_model(&self) -> &str {
        &self.default_model
    }

    fn accepts_model(&self, model: &str) -> bool {
        self.normalize_model(&model.to_lowercase()).starts_with("gemini")
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
        let body = self.build_body(prompt, config);
        let (text, usage) = self.send(model, &body).await?;

        // Free tier: no cost is ever reported
        Ok(ProviderOutput {
            text,
            model: self.normalize_model(model).to_string(),
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
        let mut body = self.build_body(prompt, config);
        body["generationConfig"]["responseMimeType"] = json!("application/json");
        body["generationConfig"]["responseSchema"] = schema.clone();

        let (text, usage) = self.send(model, &body).await?;
        let value = super::parse_json_output(&text)?;

        Ok(StructuredOutput {
            value,
            model: self.normalize_model(model).to_string(),
            cost: 0.0,
            usage,
        })
    }

    async fn is_available(&self) -> bool {
        if self.api_key.is_empty() {
            return false;
        }
        let url = format!("{}/models", self.api_base);
        match http::client()
            .get(&url)
            .header(API_KEY_HEADER, &self.api_key)
            .query(&[("pageSize", "1")])
            .timeout(http::PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(e) => {
                debug!("Gemini availability probe failed: {}", e);
                false
            }
        }
    }
}

fn parse_response(data: &serde_json::Value) -> Result<(String, TokenUsage), ProviderError> {
    let candidate = data
        .get("candidates")
        .and_then(|v| v.get(0))
        .ok_or_else(|| {
            let reason = data
                .get("promptFeedback")
                .and_then(|f| f.get("blockReason"))
                .and_then(|r| r.as_str())
                .unwrap_or("no candidates");
            ProviderError::Parse(format!("No candidates in response ({reason})"))
        })?;

    let parts = candidate
        .get("content")
        .and_then(|v| v.get("parts"))
        .and_then(|v| v.as_array())
        .ok_or_else(|| ProviderError::Parse("No parts in response".to_string()))?;

    let text: String = parts
        .iter()
        .filter_map(|part| part.get("text").and_then(|v| v.as_str()))
        .collect();

    if text.is_empty() {
        return Err(ProviderError::Parse("Empty text in response".to_string()));
    }

    let usage = match data.get("usageMetadata") {
        Some(u) => TokenUsage {
            prompt_tokens: u.get("promptTokenCount").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
            completion_tokens: u
                .get("candidatesTokenCount")
                .and_then(|v| v.as_u64())
                .unwrap_or(0) as u32,
            total_tokens: u.get("totalTokenCount").and_then(|v| v.as_u64()).unwrap_or(0) as u32,
        },
        None => TokenUsage::default(),
    };

    Ok((text, usage))
}

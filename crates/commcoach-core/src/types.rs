use serde::{Deserialize, Serialize};

/// The three interchangeable AI backends, in default priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    /// Hosted LLM with a free, quota-limited tier.
    Gemini,
    /// Self-hosted model server, free and unlimited.
    Ollama,
    /// Pay-per-token aggregator.
    OpenRouter,
}

impl ProviderId {
    pub const ALL: [ProviderId; 3] = [ProviderId::Gemini, ProviderId::Ollama, ProviderId::OpenRouter];

    /// Whether calls to this provider are billed.
    pub fn is_metered(self) -> bool {
        matches!(self, ProviderId::OpenRouter)
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderId::Gemini => write!(f, "gemini"),
            ProviderId::Ollama => write!(f, "ollama"),
            ProviderId::OpenRouter => write!(f, "openrouter"),
        }
    }
}

/// Message role in a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// Prompt handed to the router: either plain text or a role-tagged
/// conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Prompt {
    Text(String),
    Messages(Vec<Message>),
}

impl Prompt {
    /// Flatten into a message list, placing the configured system
    /// instruction first when present.
    pub fn to_messages(&self, system_instruction: Option<&str>) -> Vec<Message> {
        let mut messages = Vec::new();
        if let Some(system) = system_instruction.filter(|s| !s.is_empty()) {
            messages.push(Message::system(system));
        }
        match self {
            Prompt::Text(text) => messages.push(Message::user(text.clone())),
            Prompt::Messages(list) => messages.extend(list.iter().cloned()),
        }
        messages
    }

    /// Append text to the last user turn (or add a new one).
    pub fn with_appended(&self, suffix: &str) -> Prompt {
        match self {
            Prompt::Text(text) => Prompt::Text(format!("{text}{suffix}")),
            Prompt::Messages(list) => {
                let mut list = list.clone();
                match list.iter_mut().rev().find(|m| m.role == Role::User) {
                    Some(last) => last.content.push_str(suffix),
                    None => list.push(Message::user(suffix.trim_start())),
                }
                Prompt::Messages(list)
            }
        }
    }
}

impl From<&str> for Prompt {
    fn from(text: &str) -> Self {
        Prompt::Text(text.to_string())
    }
}

impl From<String> for Prompt {
    fn from(text: String) -> Self {
        Prompt::Text(text)
    }
}

impl From<Vec<Message>> for Prompt {
    fn from(messages: Vec<Message>) -> Self {
        Prompt::Messages(messages)
    }
}

/// Caller-supplied generation knobs. Unset fields fall back to adapter
/// defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GenerationConfig {
    pub temperature: Option<f64>,
    pub top_k: Option<u32>,
    pub top_p: Option<f64>,
    pub max_output_tokens: Option<u32>,
    pub system_instruction: Option<String>,
    pub model: Option<String>,
}

impl GenerationConfig {
    pub const DEFAULT_TEMPERATURE: f64 = 0.7;
    pub const DEFAULT_MAX_OUTPUT_TOKENS: u32 = 2048;

    pub fn temperature_or_default(&self) -> f64 {
        self.temperature.unwrap_or(Self::DEFAULT_TEMPERATURE)
    }

    pub fn max_output_tokens_or_default(&self) -> u32 {
        self.max_output_tokens.unwrap_or(Self::DEFAULT_MAX_OUTPUT_TOKENS)
    }

    /// Check the numeric knobs are within the ranges every backend accepts.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(format!("temperature must be within 0..=2, got {t}"));
            }
        }
        if let Some(p) = self.top_p {
            if !(0.0..=1.0).contains(&p) {
                return Err(format!("topP must be within 0..=1, got {p}"));
            }
        }
        if self.max_output_tokens == Some(0) {
            return Err("maxOutputTokens must be positive".to_string());
        }
        Ok(())
    }
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Normalized reply of one adapter call.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderOutput {
    pub text: String,
    pub model: String,
    pub cost: f64,
    pub usage: TokenUsage,
}

/// Parsed reply of one structured adapter call.
#[derive(Debug, Clone, PartialEq)]
pub struct StructuredOutput {
    pub value: serde_json::Value,
    pub model: String,
    pub cost: f64,
    pub usage: TokenUsage,
}

/// What the router hands back to callers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationResult {
    pub text: String,
    pub provider: ProviderId,
    pub model: String,
    pub fallback_used: bool,
    pub attempted_providers: Vec<ProviderId>,
    pub cost: f64,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredResult {
    pub value: serde_json::Value,
    pub provider: ProviderId,
    pub model: String,
    pub fallback_used: bool,
    pub attempted_providers: Vec<ProviderId>,
    pub cost: f64,
}

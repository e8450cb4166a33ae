use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Generation parameters sent with every request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
    pub system_prompt: Option<String>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            temperature: Some(0.3),
            max_tokens: None,
            system_prompt: None,
        }
    }
}

/// A single-turn request to the planner model
#[derive(Debug, Clone, PartialEq)]
pub struct ModelRequest {
    pub prompt: String,
    pub system: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<usize>,
}

impl ModelRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Fill unset parameters from `config`
    pub fn with_config(mut self, config: &ModelConfig) -> Self {
        if self.system.is_none() {
            self.system = config.system_prompt.clone();
        }
        self.temperature = self.temperature.or(config.temperature);
        self.max_tokens = self.max_tokens.or(config.max_tokens);
        self
    }
}

/// Response from a model
#[derive(Debug, Clone, PartialEq)]
pub struct ModelResponse {
    /// The actual response text
    pub content: String,
    /// Usage statistics if available
    pub usage: Option<TokenUsage>,
    /// Model that generated the response
    pub model_name: String,
}

/// Token usage statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenUsage {
    pub prompt_tokens: usize,
    pub completion_tokens: usize,
    pub total_tokens: usize,
}

/// Failure of one provider call, classified for the retry layer
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    /// Quota or rate limit on the key used; rotate
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Worth retrying with the same key
    #[error("Transient provider error: {0}")]
    Transient(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("Provider error: {0}")]
    Fatal(String),
}

impl ProviderError {
    /// Map an HTTP status and body onto the taxonomy
    pub fn from_status(status: u16, body: &str) -> Self {
        let lowered = body.to_lowercase();
        let quota = lowered.contains("resource_exhausted")
            || lowered.contains("quota")
            || lowered.contains("rate limit");
        match status {
            429 => ProviderError::RateLimited(summarize(body)),
            403 if quota => ProviderError::RateLimited(summarize(body)),
            401 | 403 => ProviderError::Auth(summarize(body)),
            408 | 500..=599 => ProviderError::Transient(format!("HTTP {}: {}", status, summarize(body))),
            _ => ProviderError::Fatal(format!("HTTP {}: {}", status, summarize(body))),
        }
    }

    pub fn is_rate_limit(&self) -> bool {
        matches!(self, ProviderError::RateLimited(_))
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(error: reqwest::Error) -> Self {
        if let Some(status) = error.status() {
            return ProviderError::from_status(status.as_u16(), &error.to_string());
        }
        if error.is_timeout() || error.is_connect() || error.is_request() || error.is_body() {
            ProviderError::Transient(error.to_string())
        } else {
            ProviderError::Fatal(error.to_string())
        }
    }
}

fn summarize(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() > 300 {
        let cut: String = trimmed.chars().take(300).collect();
        format!("{}...", cut)
    } else {
        trimmed.to_string()
    }
}

/// Remove a surrounding markdown code fence, if the whole answer is fenced
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return text.to_string();
    }
    let mut lines: Vec<&str> = trimmed.lines().collect();
    lines.remove(0);
    if lines.last().is_some_and(|l| l.trim() == "```") {
        lines.pop();
    }
    let mut body = lines.join("\n");
    if text.ends_with('\n') || !body.is_empty() {
        body.push('\n');
    }
    body
}

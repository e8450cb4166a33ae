use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::traits::Model;
use super::types::{ModelRequest, ModelResponse, ProviderError, TokenUsage};
use crate::constants::HTTP_REQUEST_TIMEOUT_SECS;

/// Client for a Gemini-style `generateContent` endpoint
pub struct GeminiModel {
    client: Client,
    base_url: String,
    model_name: String,
}

impl GeminiModel {
    pub fn new(base_url: &str, model_name: &str) -> Result<Self> {
        Ok(Self {
            client: Client::builder()
                .timeout(Duration::from_secs(HTTP_REQUEST_TIMEOUT_SECS))
                .build()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            model_name: model_name.to_string(),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/models/{}:generateContent", self.base_url, self.model_name)
    }

    fn body(request: &ModelRequest) -> Value {
        let mut body = json!({
            "contents": [{
                "role": "user",
                "parts": [{ "text": request.prompt }]
            }]
        });
        if let Some(system) = &request.system {
            body["systemInstruction"] = json!({ "parts": [{ "text": system }] });
        }
        let mut generation = serde_json::Map::new();
        if let Some(temperature) = request.temperature {
            generation.insert("temperature".to_string(), json!(temperature));
        }
        if let Some(max_tokens) = request.max_tokens {
            generation.insert("maxOutputTokens".to_string(), json!(max_tokens));
        }
        if !generation.is_empty() {
            body["generationConfig"] = Value::Object(generation);
        }
        body
    }
}

#[async_trait]
impl Model for GeminiModel {
    async fn generate(&self, api_key: &str, request: &ModelRequest) -> Result<ModelResponse, ProviderError> {
        debug!(model = %self.model_name, prompt_len = request.prompt.len(), "sending generateContent");
        let response = self
            .client
            .post(self.endpoint())
            .header("x-goog-api-key", api_key)
            .json(&Self::body(request))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), &error_text));
        }

        let parsed: GenerateContentResponse = response.json().await?;
        parse_response(parsed, &self.model_name)
    }

    fn name(&self) -> &str {
        &self.model_name
    }
}

fn parse_response(parsed: GenerateContentResponse, model_name: &str) -> Result<ModelResponse, ProviderError> {
    let content: String = parsed
        .candidates
        .iter()
        .flat_map(|c| c.content.iter())
        .flat_map(|c| c.parts.iter())
        .filter_map(|p| p.text.as_deref())
        .collect::<Vec<_>>()
        .join("");

    if content.trim().is_empty() {
        // Empty candidates show up under load and on safety blocks; both are worth one more try
        return Err(ProviderError::Transient("model returned an empty response".to_string()));
    }

    Ok(ModelResponse {
        content,
        usage: parsed.usage_metadata.map(|u| TokenUsage {
            prompt_tokens: u.prompt_token_count,
            completion_tokens: u.candidates_token_count,
            total_tokens: u.total_token_count,
        }),
        model_name: model_name.to_string(),
    })
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Vec<Part>,
}

#[derive(Debug, Deserialize)]
struct Part {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: usize,
    #[serde(default)]
    candidates_token_count: usize,
    #[serde(default)]
    total_token_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_includes_system_and_generation_config() {
        let request = ModelRequest {
            prompt: "hello".to_string(),
            system: Some("be brief".to_string()),
            temperature: Some(0.2),
            max_tokens: None,
        };
        let body = GeminiModel::body(&request);
        assert_eq!(body["contents"][0]["parts"][0]["text"], "hello");
        assert_eq!(body["systemInstruction"]["parts"][0]["text"], "be brief");
        assert!(body["generationConfig"]["temperature"].is_number());
        assert!(body["generationConfig"].get("maxOutputTokens").is_none());
    }

    #[test]
    fn test_parse_joins_parts() {
        let raw = r#"{"candidates":[{"content":{"parts":[{"text":"CREATE_FILE::a"},{"text":"\nFINISH::ok"}]}}],
                      "usageMetadata":{"promptTokenCount":3,"candidatesTokenCount":4,"totalTokenCount":7}}"#;
        let parsed: GenerateContentResponse = serde_json::from_str(raw).unwrap();
        let response = parse_response(parsed, "gemini-2.5-flash").unwrap();
        assert_eq!(response.content, "CREATE_FILE::a\nFINISH::ok");
        assert_eq!(response.usage.unwrap().total_tokens, 7);
    }

    #[test]
    fn test_empty_candidates_are_transient() {
        let parsed: GenerateContentResponse = serde_json::from_str(r#"{"candidates":[]}"#).unwrap();
        assert!(parse_response(parsed, "m").unwrap_err().is_transient());
    }

    #[test]
    fn test_endpoint() {
        let model = GeminiModel::new("https://example.test/v1beta/", "gemini-2.5-flash").unwrap();
        assert_eq!(
            model.endpoint(),
            "https://example.test/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }
}

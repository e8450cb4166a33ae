use anyhow::{Context, Result};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::debug;

use super::invoker::ResilientInvoker;
use crate::agents::{ContentGenerator, ContentRequest};
use crate::models::{strip_code_fences, ModelConfig, ModelRequest};

/// Generates file content by asking the planner model
pub struct PlannerContentGenerator {
    invoker: Arc<ResilientInvoker>,
    config: ModelConfig,
}

impl PlannerContentGenerator {
    pub fn new(invoker: Arc<ResilientInvoker>, config: ModelConfig) -> Self {
        Self { invoker, config }
    }
}

#[async_trait]
impl ContentGenerator for PlannerContentGenerator {
    async fn generate(&self, request: &ContentRequest) -> Result<String> {
        // File bodies come back raw; the planner's system prompt does not apply
        let model_request = ModelRequest {
            system: None,
            ..ModelRequest::new(request.to_prompt())
        }
        .with_config(&ModelConfig {
            system_prompt: None,
            ..self.config.clone()
        });

        let response = self
            .invoker
            .invoke(&model_request)
            .await
            .with_context(|| format!("Failed to generate content for {}", request.path))?;

        debug!(path = %request.path, bytes = response.content.len(), "generated content");
        Ok(strip_code_fences(&response.content))
    }
}

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

use super::types::{ModelRequest, ModelResponse, ProviderError};

/// Core trait that all model backends must implement
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Model: Send + Sync {
    /// Send one request using the given API key
    async fn generate(&self, api_key: &str, request: &ModelRequest) -> Result<ModelResponse, ProviderError>;

    /// Get the name of the model
    fn name(&self) -> &str;
}

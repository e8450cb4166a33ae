use anyhow::Result;
use std::sync::Arc;

use super::gemini::GeminiModel;
use super::traits::Model;
use crate::app::ModelSettings;

/// Factory for creating model instances from configuration
pub struct ModelFactory;

impl ModelFactory {
    /// Create the planner model named in `settings`
    /// Format: `[provider/]model`, e.g. `gemini/gemini-2.5-flash` or `gemini-2.5-flash`
    pub fn create(settings: &ModelSettings) -> Result<Arc<dyn Model>> {
        let (provider, model) = match settings.name.split_once('/') {
            Some((provider, model)) => (provider, model),
            None => ("gemini", settings.name.as_str()),
        };

        match provider {
            "gemini" | "google" => Ok(Arc::new(GeminiModel::new(&settings.base_url, model)?)),
            other => anyhow::bail!(
                "Unsupported model provider '{}'. Expected 'gemini/<model>' (e.g., 'gemini/gemini-2.5-flash')",
                other
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_model_name_defaults_to_gemini() {
        let settings = ModelSettings {
            name: "gemini-2.5-flash".to_string(),
            ..Default::default()
        };
        let model = ModelFactory::create(&settings).unwrap();
        assert_eq!(model.name(), "gemini-2.5-flash");
    }

    #[test]
    fn test_unknown_provider_is_rejected() {
        let settings = ModelSettings {
            name: "openai/gpt-4".to_string(),
            ..Default::default()
        };
        assert!(ModelFactory::create(&settings).is_err());
    }
}

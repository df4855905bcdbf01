//! Model registry for the configured LLM provider

use super::models::find_model;
use super::{all_models, LlmService, LoggingService, ModelDef, OpenAIService};
use std::collections::HashMap;
use std::sync::Arc;

pub const DEFAULT_MODEL: &str = "gpt-4.1";

/// Configuration for the LLM provider
#[derive(Debug, Clone, Default)]
pub struct LlmConfig {
    pub openai_api_key: Option<String>,
    /// Override for OpenAI-compatible endpoints (proxies, local servers)
    pub openai_base_url: Option<String>,
    /// Default model ID
    pub default_model: Option<String>,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self {
            openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
            openai_base_url: std::env::var("OPENAI_BASE_URL").ok(),
            default_model: std::env::var("DEFAULT_MODEL").ok(),
        }
    }
}

/// Registry of available LLM models
pub struct ModelRegistry {
    services: HashMap<String, Arc<dyn LlmService>>,
    default_model: String,
}

impl ModelRegistry {
    pub fn new(config: &LlmConfig) -> Self {
        let mut services: HashMap<String, Arc<dyn LlmService>> = HashMap::new();

        if let Some(api_key) = config.openai_api_key.as_ref().filter(|k| !k.is_empty()) {
            for model_def in all_models() {
                match OpenAIService::new(
                    api_key.clone(),
                    model_def.id,
                    model_def.api_name,
                    config.openai_base_url.as_deref(),
                ) {
                    Ok(service) => {
                        services.insert(
                            model_def.id.to_string(),
                            Arc::new(LoggingService::new(Arc::new(service))),
                        );
                    }
                    Err(e) => {
                        tracing::warn!(model = model_def.id, error = %e, "Skipping model");
                    }
                }
            }
        }

        let default_model = config
            .default_model
            .clone()
            .filter(|id| find_model(id).is_some())
            .unwrap_or_else(|| DEFAULT_MODEL.to_string());

        Self {
            services,
            default_model,
        }
    }

    /// Get a model by ID
    pub fn get(&self, model_id: &str) -> Option<Arc<dyn LlmService>> {
        self.services.get(model_id).cloned()
    }

    /// Get the default model
    pub fn default(&self) -> Option<Arc<dyn LlmService>> {
        self.get(&self.default_model)
    }

    /// Get the default model ID
    pub fn default_model_id(&self) -> &str {
        &self.default_model
    }

    /// Definition of the default model
    pub fn default_model_def(&self) -> Option<&'static ModelDef> {
        find_model(&self.default_model)
    }

    /// List all available model IDs
    pub fn available_models(&self) -> Vec<String> {
        let mut models: Vec<_> = self.services.keys().cloned().collect();
        models.sort();
        models
    }

    /// Check if any models are available
    pub fn has_models(&self) -> bool {
        !self.services.is_empty()
    }
}

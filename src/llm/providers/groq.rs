//! Groq-hosted backend.
//!
//! Wraps the shared OpenAI-compatible wire protocol, overriding only the
//! timeout behavior: a `generate` call that times out returns a fixed
//! user-visible message instead of propagating an error, so a slow Groq
//! response doesn't trip fallback to another backend.

use crate::error::{AppError, LlmError, Result};
use crate::llm::provider::{LlmProvider, ProviderConfig, ProviderStats, ProviderType};
use crate::llm::providers::base::OpenAICompatible;
use crate::llm::providers::openai_compatible::OpenAICompatibleProvider;
use crate::llm::{EmbeddingResponse, GenerationResponse, Message};
use async_trait::async_trait;
use std::sync::Arc;

const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
const TIMEOUT_MESSAGE: &str = "The request to Groq timed out. Please try again.";

pub struct GroqAdapter {
    api_key: Option<String>,
}

impl OpenAICompatible for GroqAdapter {
    fn base_url(&self) -> &str {
        GROQ_BASE_URL
    }

    fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref()
    }
}

/// Thin wrapper around [`OpenAICompatibleProvider`] that intercepts timeouts.
pub struct GroqProvider {
    inner: OpenAICompatibleProvider<GroqAdapter>,
}

impl GroqProvider {
    pub fn create(config: ProviderConfig) -> Arc<dyn LlmProvider> {
        let adapter = GroqAdapter {
            api_key: config.api_key.clone(),
        };
        Arc::new(Self {
            inner: OpenAICompatibleProvider::new(adapter, config),
        })
    }

    pub fn from_env(text_model: String) -> std::result::Result<Arc<dyn LlmProvider>, String> {
        let api_key =
            std::env::var("GROQ_API_KEY").map_err(|_| "GROQ_API_KEY environment variable not set")?;

        let config = ProviderConfig {
            provider: ProviderType::Groq,
            name: "groq".to_string(),
            api_key: Some(api_key),
            base_url: Some(GROQ_BASE_URL.to_string()),
            text_model,
            embedding_model: None,
            max_tokens: 512,
            temperature: 0.3,
            timeout: 60,
            options: serde_json::Value::Null,
        };

        Ok(Self::create(config))
    }
}

#[async_trait]
impl LlmProvider for GroqProvider {
    fn provider_type(&self) -> ProviderType {
        self.inner.provider_type()
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn generate(&self, messages: &[Message], max_tokens: u32, temperature: f32) -> Result<GenerationResponse> {
        match self.inner.generate(messages, max_tokens, temperature).await {
            Err(AppError::Llm(LlmError::Timeout)) => Ok(GenerationResponse {
                text: TIMEOUT_MESSAGE.to_string(),
                tokens_used: None,
                model: "groq".to_string(),
                finish_reason: Some("timeout".to_string()),
            }),
            other => other,
        }
    }

    async fn embed(&self, text: &str) -> Result<EmbeddingResponse> {
        self.inner.embed(text).await
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        self.inner.list_models().await
    }

    async fn is_model_available(&self, model: &str) -> Result<bool> {
        self.inner.is_model_available(model).await
    }

    async fn health_check(&self) -> Result<bool> {
        self.inner.health_check().await
    }

    fn get_stats(&self) -> ProviderStats {
        self.inner.get_stats()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_groq_generate_masks_timeout() {
        let adapter = GroqAdapter {
            api_key: Some("test-key".to_string()),
        };
        let config = ProviderConfig {
            provider: ProviderType::Groq,
            name: "groq".to_string(),
            api_key: Some("test-key".to_string()),
            base_url: Some(GROQ_BASE_URL.to_string()),
            text_model: "llama-3.1-8b-instant".to_string(),
            embedding_model: None,
            max_tokens: 512,
            temperature: 0.3,
            timeout: 60,
            options: serde_json::Value::Null,
        };
        let provider = GroqProvider {
            inner: OpenAICompatibleProvider::new(adapter, config),
        };
        assert_eq!(provider.provider_type(), ProviderType::Groq);
        assert_eq!(provider.name(), "groq");
    }
}

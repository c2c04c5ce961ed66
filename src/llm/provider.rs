//! The common interface every language-model backend implements.

use crate::error::Result;
use crate::llm::{EmbeddingResponse, GenerationResponse, Message};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The three backends the query pipeline can route to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    Local,
    OpenAI,
    Groq,
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProviderType::Local => write!(f, "local"),
            ProviderType::OpenAI => write!(f, "openai"),
            ProviderType::Groq => write!(f, "groq"),
        }
    }
}

/// Static configuration for a single backend instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub provider: ProviderType,
    pub name: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub text_model: String,
    pub embedding_model: Option<String>,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default)]
    pub options: serde_json::Value,
}

fn default_max_tokens() -> u32 {
    512
}

fn default_temperature() -> f32 {
    0.3
}

fn default_timeout() -> u64 {
    60
}

/// Trait every backend implements.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn provider_type(&self) -> ProviderType;

    fn name(&self) -> &str;

    async fn generate(&self, messages: &[Message], max_tokens: u32, temperature: f32) -> Result<GenerationResponse>;

    async fn embed(&self, text: &str) -> Result<EmbeddingResponse>;

    async fn list_models(&self) -> Result<Vec<String>>;

    async fn is_model_available(&self, model: &str) -> Result<bool>;

    /// Health check; default implementation tries to list models.
    async fn health_check(&self) -> Result<bool> {
        match self.list_models().await {
            Ok(_) => Ok(true),
            Err(_) => Ok(false),
        }
    }

    fn get_stats(&self) -> ProviderStats {
        ProviderStats::default()
    }
}

/// Usage counters a backend may report.
#[derive(Debug, Clone, Default)]
pub struct ProviderStats {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub total_tokens_input: u64,
    pub total_tokens_output: u64,
}

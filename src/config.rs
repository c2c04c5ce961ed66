//! Configuration management for the document QA service
//!
//! Layered the same way upstream agent configs are layered: a hard-coded
//! [`Default`], optionally overridden by a config file, optionally overridden
//! again by recognized environment variables.

use crate::cache::LlmCacheConfig;
use serde::{Deserialize, Serialize};

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub chunking: ChunkingConfig,
    pub vector_store: VectorStoreConfig,
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub progress: ProgressConfig,
}

/// Language model configuration: ordered backend preference plus per-backend settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Prefer the local backend over hosted ones when both are available
    #[serde(default)]
    pub prefer_local: bool,

    /// Maximum tokens for generation
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Request timeout in seconds for hosted backends
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    pub local: LocalLlmConfig,
    pub openai: HostedLlmConfig,
    pub groq: HostedLlmConfig,

    /// LLM response cache
    #[serde(default)]
    pub cache: LlmCacheConfig,
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

/// Settings for the in-process local backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalLlmConfig {
    pub enabled: bool,
    /// Path to a GGUF model file; if absent the local backend reports unavailable
    pub model_path: Option<String>,
    #[serde(default)]
    pub use_gpu: bool,
    #[serde(default = "default_repetition_penalty")]
    pub repetition_penalty: f32,
}

fn default_repetition_penalty() -> f32 {
    1.1
}

impl Default for LocalLlmConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            model_path: None,
            use_gpu: false,
            repetition_penalty: default_repetition_penalty(),
        }
    }
}

/// Settings shared by the OpenAI-compatible hosted backends
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostedLlmConfig {
    pub enabled: bool,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub text_model: String,
    pub embedding_model: Option<String>,
}

/// Embedding backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "local" (fastembed/candle) or "hosted" (delegates to the LLM layer)
    pub backend: String,
    pub model: String,
    pub dimension: usize,
    #[serde(default)]
    pub use_gpu: bool,
}

/// Chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            chunk_overlap: 200,
        }
    }
}

/// Vector store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorStoreConfig {
    pub data_dir: String,
    #[serde(default = "default_ask_threshold")]
    pub ask_score_threshold: f32,
    #[serde(default = "default_search_threshold")]
    pub search_score_threshold: f32,
}

fn default_ask_threshold() -> f32 {
    0.3
}

fn default_search_threshold() -> f32 {
    0.2
}

/// Relational database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Progress/stream transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressConfig {
    /// Bounded queue depth per connected client
    pub queue_depth: usize,
    /// Cadence of simulated token streaming, in milliseconds
    pub stream_interval_ms: u64,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            queue_depth: 64,
            stream_interval_ms: 50,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            llm: LlmConfig {
                prefer_local: false,
                max_tokens: default_max_tokens(),
                temperature: default_temperature(),
                timeout: default_timeout(),
                local: LocalLlmConfig::default(),
                openai: HostedLlmConfig {
                    enabled: true,
                    api_key: None,
                    base_url: None,
                    text_model: "gpt-4o-mini".to_string(),
                    embedding_model: Some("text-embedding-3-small".to_string()),
                },
                groq: HostedLlmConfig {
                    enabled: true,
                    api_key: None,
                    base_url: Some("https://api.groq.com/openai/v1".to_string()),
                    text_model: "llama-3.1-8b-instant".to_string(),
                    embedding_model: None,
                },
                cache: LlmCacheConfig::default(),
            },
            embedding: EmbeddingConfig {
                backend: "local".to_string(),
                model: "intfloat/e5-large-v2".to_string(),
                dimension: 1024,
                use_gpu: false,
            },
            chunking: ChunkingConfig::default(),
            vector_store: VectorStoreConfig {
                data_dir: "data/vector_store".to_string(),
                ask_score_threshold: default_ask_threshold(),
                search_score_threshold: default_search_threshold(),
            },
            database: DatabaseConfig {
                url: "sqlite://data/docqa.db?mode=rwc".to_string(),
            },
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8000,
            },
            progress: ProgressConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from a file, format inferred from its extension
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        let config = match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::from_str(&content)?,
            Some("toml") => toml::from_str(&content)?,
            Some("yaml") | Some("yml") => serde_yml::from_str(&content)?,
            _ => return Err(anyhow::anyhow!("unsupported config file format")),
        };
        Ok(config)
    }

    /// Save configuration to a file, format inferred from its extension
    pub fn to_file<P: AsRef<std::path::Path>>(&self, path: P) -> anyhow::Result<()> {
        let content = match path.as_ref().extension().and_then(|s| s.to_str()) {
            Some("json") => serde_json::to_string_pretty(self)?,
            Some("toml") => toml::to_string(self)?,
            Some("yaml") | Some("yml") => serde_yml::to_string(self)?,
            _ => return Err(anyhow::anyhow!("unsupported config file format")),
        };
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Apply recognized environment variable overrides on top of whatever was loaded
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("DATABASE_URL") {
            self.database.url = url;
        }
        if let Ok(key) = std::env::var("OPENAI_API_KEY") {
            self.llm.openai.api_key = Some(key);
        }
        if let Ok(key) = std::env::var("GROQ_API_KEY") {
            self.llm.groq.api_key = Some(key);
        }
        if let Ok(use_gpu) = std::env::var("USE_GPU") {
            let flag = matches!(use_gpu.to_lowercase().as_str(), "1" | "true" | "yes");
            self.embedding.use_gpu = flag;
            self.llm.local.use_gpu = flag;
        }
        if let Ok(model) = std::env::var("EMBEDDING_MODEL") {
            self.embedding.model = model;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.embedding.model.is_empty() {
            return Err(anyhow::anyhow!("embedding model name cannot be empty"));
        }

        if self.embedding.dimension == 0 {
            return Err(anyhow::anyhow!("embedding dimension must be greater than 0"));
        }

        if !(0.0..=1.0).contains(&self.vector_store.ask_score_threshold)
            || !(0.0..=1.0).contains(&self.vector_store.search_score_threshold)
        {
            return Err(anyhow::anyhow!(
                "similarity thresholds must be between 0.0 and 1.0"
            ));
        }

        if self.chunking.chunk_size == 0 {
            return Err(anyhow::anyhow!("chunk_size must be greater than 0"));
        }

        if self.chunking.chunk_overlap >= self.chunking.chunk_size {
            return Err(anyhow::anyhow!("chunk_overlap must be smaller than chunk_size"));
        }

        if let Some(url) = self.llm.openai.base_url.as_ref() {
            if !url.starts_with("http") {
                return Err(anyhow::anyhow!("invalid OpenAI base URL: {}", url));
            }
        }
        if let Some(url) = self.llm.groq.base_url.as_ref() {
            if !url.starts_with("http") {
                return Err(anyhow::anyhow!("invalid Groq base URL: {}", url));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.embedding.dimension, 1024);
        assert_eq!(config.database.url, "sqlite://data/docqa.db?mode=rwc");
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        assert!(config.validate().is_ok());

        config.embedding.model = String::new();
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.vector_store.ask_score_threshold = 1.5;
        assert!(config.validate().is_err());

        config = AppConfig::default();
        config.chunking.chunk_overlap = config.chunking.chunk_size;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = AppConfig::default();
        std::env::set_var("EMBEDDING_MODEL", "test-model");
        config.apply_env_overrides();
        assert_eq!(config.embedding.model, "test-model");
        std::env::remove_var("EMBEDDING_MODEL");
    }
}

//! Turns chunk/query text into dense vectors.
//!
//! Two backends implement [`Embedder`]: [`LocalEmbedder`], which runs a
//! sentence-embedding model in-process via `fastembed`'s candle backend, and
//! [`HostedEmbedder`], which delegates to whichever configured
//! [`LlmProvider`](crate::llm::LlmProvider) exposes an embeddings endpoint.

use crate::config::EmbeddingConfig;
use crate::error::{AppError, LlmError, Result};
use crate::llm::LlmProvider;
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::{Arc, Mutex};

/// Prefix fastembed-style retrieval models expect on the query side so the
/// same model embeds queries and passages into a comparable space.
pub const QUERY_PREFIX: &str = "query: ";

#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let prefixed = format!("{QUERY_PREFIX}{text}");
        let mut batch = self.embed_batch(&[prefixed]).await?;
        batch
            .pop()
            .ok_or_else(|| AppError::Llm(LlmError::EmbeddingFailed("empty embedding batch".to_string())))
    }

    fn dim(&self) -> usize;
}

/// Maps a config-supplied model name to the closest fastembed model.
/// fastembed ships a fixed catalog; unrecognized names fall back to a
/// general-purpose multilingual model rather than failing construction.
fn resolve_model(name: &str) -> EmbeddingModel {
    match name.to_lowercase().as_str() {
        "intfloat/e5-large-v2" | "e5-large-v2" => EmbeddingModel::MultilingualE5Large,
        "bge-base-en-v1.5" | "baai/bge-base-en-v1.5" => EmbeddingModel::BGEBaseENV15,
        "bge-small-en-v1.5" | "baai/bge-small-en-v1.5" => EmbeddingModel::BGESmallENV15,
        "all-minilm-l6-v2" | "sentence-transformers/all-minilm-l6-v2" => EmbeddingModel::AllMiniLML6V2,
        _ => EmbeddingModel::MultilingualE5Large,
    }
}

pub struct LocalEmbedder {
    model: Arc<Mutex<TextEmbedding>>,
    dim: usize,
}

impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model_kind = resolve_model(&config.model);
        let model = TextEmbedding::try_new(InitOptions::new(model_kind))
            .map_err(|e| AppError::Llm(LlmError::EmbeddingFailed(format!("failed to load local embedding model: {e}"))))?;
        Ok(Self {
            model: Arc::new(Mutex::new(model)),
            dim: config.dimension,
        })
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let texts = texts.to_vec();
        let model = self.model.clone();
        tokio::task::spawn_blocking(move || {
            let guard = match model.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let borrowed: Vec<&str> = texts.iter().map(|s| s.as_str()).collect();
            guard
                .embed(borrowed, None)
                .map_err(|e| AppError::Llm(LlmError::EmbeddingFailed(format!("local embedding failed: {e}"))))
        })
        .await
        .map_err(|e| AppError::Llm(LlmError::EmbeddingFailed(format!("embedding task panicked: {e}"))))?
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

pub struct HostedEmbedder {
    provider: Arc<dyn LlmProvider>,
    dim: usize,
}

impl HostedEmbedder {
    pub fn new(provider: Arc<dyn LlmProvider>, dim: usize) -> Self {
        Self { provider, dim }
    }
}

#[async_trait]
impl Embedder for HostedEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            let response = self.provider.embed(text).await?;
            out.push(response.embedding);
        }
        Ok(out)
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

/// Embeds via whichever hosted backend the router falls back to, rather than
/// pinning to one provider up front.
pub struct RouterEmbedder {
    router: crate::llm::BackendRouter,
    dim: usize,
}

impl RouterEmbedder {
    pub fn new(router: crate::llm::BackendRouter, dim: usize) -> Self {
        Self { router, dim }
    }
}

#[async_trait]
impl Embedder for RouterEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            let (response, _backend) = self.router.embed_with_fallback(text).await?;
            out.push(response.embedding);
        }
        Ok(out)
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

/// Stable 16-hex-character content hash, used to dedupe identical chunks and
/// bucket equivalent questions for analytics without storing full text twice.
pub fn content_hash(text: &str) -> String {
    let digest = md5::compute(text.trim().to_lowercase());
    format!("{:x}", digest)[..16].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_model_known_names() {
        assert!(matches!(resolve_model("intfloat/e5-large-v2"), EmbeddingModel::MultilingualE5Large));
        assert!(matches!(resolve_model("BGE-Small-EN-v1.5"), EmbeddingModel::BGESmallENV15));
    }

    #[test]
    fn test_resolve_model_unknown_falls_back() {
        assert!(matches!(resolve_model("some-made-up-model"), EmbeddingModel::MultilingualE5Large));
    }

    #[test]
    fn test_content_hash_stable_and_case_insensitive() {
        let a = content_hash("What is Rust?");
        let b = content_hash("what is rust?");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[tokio::test]
    async fn test_hosted_embedder_delegates_to_provider() {
        use crate::llm::{EmbeddingResponse, GenerationResponse, Message};
        use crate::llm::provider::{ProviderStats, ProviderType};

        struct StubProvider;
        #[async_trait]
        impl LlmProvider for StubProvider {
            fn provider_type(&self) -> ProviderType {
                ProviderType::OpenAI
            }
            fn name(&self) -> &str {
                "stub"
            }
            async fn generate(&self, _messages: &[Message], _max_tokens: u32, _temperature: f32) -> Result<GenerationResponse> {
                unreachable!()
            }
            async fn embed(&self, text: &str) -> Result<EmbeddingResponse> {
                Ok(EmbeddingResponse {
                    embedding: vec![text.len() as f32, 0.0],
                    model: "stub".to_string(),
                })
            }
            async fn list_models(&self) -> Result<Vec<String>> {
                Ok(vec![])
            }
            async fn is_model_available(&self, _model: &str) -> Result<bool> {
                Ok(true)
            }
            fn get_stats(&self) -> ProviderStats {
                ProviderStats::default()
            }
        }

        let embedder = HostedEmbedder::new(Arc::new(StubProvider), 2);
        let out = embedder.embed_batch(&["hello".to_string()]).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0][0], 5.0);
    }
}

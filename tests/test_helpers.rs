//! Shared fixtures for the integration test suite: an in-memory `Storage`, a
//! `VectorStore` backed by a deterministic embedder, and the config/router
//! combinations needed to exercise the query pipeline without a network call.

use async_trait::async_trait;
use chrono::Utc;
use docqa_rag::cache::LlmCacheConfig;
use docqa_rag::config::{HostedLlmConfig, LlmConfig, LocalLlmConfig};
use docqa_rag::embedder::Embedder;
use docqa_rag::llm::provider::{LlmProvider, ProviderType};
use docqa_rag::llm::{EmbeddingResponse, GenerationResponse, Message};
use docqa_rag::storage::DocumentRecord;
use docqa_rag::{BackendRouter, Chunker, RagOrchestrator, Result, Storage, VectorStore};
use std::path::Path;
use std::sync::Arc;

/// Deterministic embedding stand-in: folds each word's bytes into a bucket so
/// texts sharing vocabulary end up with a higher dot product than unrelated
/// ones, without pulling in a real embedding model.
pub struct HashEmbedder {
    dim: usize,
}

impl HashEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim }
    }
}

#[async_trait]
impl Embedder for HashEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; self.dim];
                for word in t.to_lowercase().split_whitespace() {
                    let bucket = word.bytes().map(|b| b as usize).sum::<usize>() % self.dim;
                    v[bucket] += 1.0;
                }
                v
            })
            .collect())
    }

    fn dim(&self) -> usize {
        self.dim
    }
}

/// Answers every prompt with a fixed string, for exercising the "a backend
/// produced a real answer" path without a network call.
pub struct StaticAnswerProvider {
    pub answer: String,
}

#[async_trait]
impl LlmProvider for StaticAnswerProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::OpenAI
    }

    fn name(&self) -> &str {
        "stub"
    }

    async fn generate(&self, _messages: &[Message], _max_tokens: u32, _temperature: f32) -> Result<GenerationResponse> {
        Ok(GenerationResponse {
            text: self.answer.clone(),
            tokens_used: Some(42),
            model: "stub".to_string(),
            finish_reason: Some("stop".to_string()),
        })
    }

    async fn embed(&self, _text: &str) -> Result<EmbeddingResponse> {
        Ok(EmbeddingResponse {
            embedding: vec![0.1, 0.2],
            model: "stub".to_string(),
        })
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        Ok(vec!["stub".to_string()])
    }

    async fn is_model_available(&self, _model: &str) -> Result<bool> {
        Ok(true)
    }
}

/// An in-memory SQLite-backed `Storage`, schema already migrated.
pub async fn test_storage() -> Storage {
    Storage::connect("sqlite::memory:").await.unwrap()
}

/// A `VectorStore` backed by `HashEmbedder`, rooted in a fresh temp dir.
pub async fn test_store(dim: usize) -> (VectorStore, tempfile::TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let store = VectorStore::open(dir.path(), Arc::new(HashEmbedder::new(dim)), "hash-embedder", false)
        .await
        .unwrap();
    (store, dir)
}

/// A `RagOrchestrator` wired to a fresh `VectorStore`.
pub async fn test_orchestrator(dim: usize) -> (RagOrchestrator, tempfile::TempDir) {
    let (store, dir) = test_store(dim).await;
    let orchestrator = RagOrchestrator::new(Chunker::new(400, 50), Arc::new(store));
    (orchestrator, dir)
}

/// An `LlmConfig` with every backend disabled, for exercising the
/// no-provider-available path deterministically (no network calls, no local
/// model file required).
pub fn no_provider_llm_config() -> LlmConfig {
    LlmConfig {
        prefer_local: false,
        max_tokens: 512,
        temperature: 0.3,
        timeout: 5,
        local: LocalLlmConfig {
            enabled: false,
            model_path: None,
            use_gpu: false,
            repetition_penalty: 1.1,
        },
        openai: HostedLlmConfig {
            enabled: false,
            api_key: None,
            base_url: None,
            text_model: "gpt-4o-mini".to_string(),
            embedding_model: None,
        },
        groq: HostedLlmConfig {
            enabled: false,
            api_key: None,
            base_url: None,
            text_model: "llama-3.1-8b-instant".to_string(),
            embedding_model: None,
        },
        cache: LlmCacheConfig {
            enabled: false,
            ..LlmCacheConfig::default()
        },
    }
}

/// A router with no backends configured at all, equivalent to what
/// `BackendRouter::from_config` would build from `no_provider_llm_config`.
pub async fn no_provider_router() -> BackendRouter {
    BackendRouter::from_config(&no_provider_llm_config()).await
}

/// A router around a single stub provider that always answers with `answer`.
pub fn stub_router(answer: impl Into<String>) -> BackendRouter {
    BackendRouter::from_provider(Arc::new(StaticAnswerProvider { answer: answer.into() }))
}

/// Replays the upload handler's own upsert-ingest-upsert sequence (see
/// `upload_document_handler`) against an already-written file, returning the
/// document row with the same status/char_count/chunks_created it would end
/// up with after a real multipart upload.
pub async fn simulate_upload(
    storage: &Storage,
    orchestrator: &RagOrchestrator,
    path: &Path,
    document_id: &str,
    filename: &str,
    ext: &str,
) -> DocumentRecord {
    let now = Utc::now();
    let mut record = DocumentRecord {
        id: document_id.to_string(),
        filename: filename.to_string(),
        file_path: path.display().to_string(),
        file_type: ext.to_string(),
        processed_path: None,
        status: "uploaded".to_string(),
        char_count: 0,
        chunks_created: 0,
        document_id: document_id.to_string(),
        created_at: now,
        updated_at: now,
    };
    storage.upsert_document(&record).await.unwrap();

    match orchestrator.ingest(path, document_id, Default::default()).await {
        Ok(result) => {
            record.status = "processed".to_string();
            record.char_count = result.char_count as i64;
            record.chunks_created = result.chunks_created as i64;
        }
        Err(_) => {
            record.status = "failed".to_string();
        }
    }
    record.updated_at = Utc::now();
    storage.upsert_document(&record).await.unwrap();
    record
}

//! Document question-answering service
//!
//! A retrieval-augmented question-answering service over uploaded documents:
//! - Text extraction from PDF, DOCX, HTML, Markdown, and plain text
//! - Chunking and embedding into a persisted vector index
//! - Multi-backend LLM generation (local GGUF, OpenAI, Groq) with fallback
//! - A query pipeline composing search, prompt assembly, and generation
//! - Usage analytics and a per-client progress/streaming transport
//!
//! # Example
//!
//! ```rust,no_run
//! use docqa_rag::config::AppConfig;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut config = AppConfig::default();
//!     config.apply_env_overrides();
//!     config.validate()?;
//!     Ok(())
//! }
//! ```

pub mod analytics;
pub mod api;
pub mod cache;
pub mod chunker;
pub mod config;
pub mod embedder;
pub mod error;
pub mod extractor;
pub mod llm;
pub mod progress;
pub mod query;
pub mod rag;
pub mod storage;
pub mod vector_store;

// Re-export main types
pub use analytics::Analytics;
pub use cache::{CacheStats, LlmCache, LlmCacheConfig};
pub use chunker::{Chunk, Chunker};
pub use config::AppConfig;
pub use embedder::Embedder;
pub use error::{AppError, Result};
pub use llm::{BackendRouter, LlmProvider};
pub use progress::ProgressHub;
pub use query::QueryPipeline;
pub use rag::RagOrchestrator;
pub use storage::Storage;
pub use vector_store::VectorStore;

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(VERSION.starts_with(char::is_numeric));
    }
}

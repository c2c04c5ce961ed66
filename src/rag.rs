//! Ties text extraction, chunking, and vector indexing together into a
//! single ingest/search surface.

use crate::chunker::Chunker;
use crate::error::{AppError, Result};
use crate::extractor;
use crate::progress::{ProgressHub, Stage};
use crate::vector_store::{SearchHit, VectorStore};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// How many chunks are embedded-and-added per batch in the progress path;
/// gives steady progress granularity without one event per chunk.
const PROGRESS_BATCH_SIZE: usize = 10;

/// True if extracted text has nothing a retrieval index could use: either
/// genuinely empty, or equal to one of the extractor's own placeholder
/// strings (e.g. an empty `.txt` file's substituted body).
fn is_uninformative(text: &str) -> bool {
    let trimmed = text.trim();
    trimmed.is_empty() || trimmed == extractor::EMPTY_TXT_PLACEHOLDER
}

#[derive(Debug, Clone)]
pub struct IngestResult {
    pub success: bool,
    pub char_count: usize,
    pub chunks_created: usize,
    pub chunks_added: usize,
    pub metadata: HashMap<String, Value>,
}

#[derive(Debug, Clone)]
pub struct SearchResponse {
    pub hits: Vec<SearchHit>,
    pub elapsed_secs: f64,
    pub success: bool,
}

#[derive(Clone)]
pub struct RagOrchestrator {
    chunker: Chunker,
    store: Arc<VectorStore>,
}

impl RagOrchestrator {
    pub fn new(chunker: Chunker, store: Arc<VectorStore>) -> Self {
        Self { chunker, store }
    }

    pub async fn ingest(
        &self,
        path: &Path,
        document_id: &str,
        metadata: HashMap<String, Value>,
    ) -> Result<IngestResult> {
        let extracted = extractor::extract(path)?;
        if is_uninformative(&extracted.text) {
            return Err(AppError::NoExtractableText);
        }

        let mut full_metadata = metadata;
        full_metadata.insert(
            "file_path".to_string(),
            Value::String(path.display().to_string()),
        );
        full_metadata.insert("char_count".to_string(), Value::from(extracted.char_count));
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            full_metadata.insert("filename".to_string(), Value::String(name.to_string()));
        }

        let chunks = self
            .chunker
            .chunk(document_id, &extracted.text, full_metadata.clone());
        let chunks_created = chunks.len();

        let chunks_added = self.store.add(chunks).await?;

        info!(
            document_id,
            chunks_created, chunks_added, "document ingested"
        );

        Ok(IngestResult {
            success: true,
            char_count: extracted.char_count,
            chunks_created,
            chunks_added,
            metadata: full_metadata,
        })
    }

    /// Same contract as [`Self::ingest`] but reports progress through `hub`
    /// as it moves through extraction, chunking, and batched embedding.
    pub async fn ingest_with_progress(
        &self,
        path: &Path,
        document_id: &str,
        metadata: HashMap<String, Value>,
        client_id: &str,
        hub: &ProgressHub,
    ) -> Result<IngestResult> {
        hub.report_progress(client_id, document_id, Stage::Extracting, 10, "extracting text")
            .await;

        let extracted = match extractor::extract(path) {
            Ok(e) => e,
            Err(e) => {
                hub.report_progress(client_id, document_id, Stage::Error, 0, &e.to_string())
                    .await;
                return Err(e);
            }
        };

        if is_uninformative(&extracted.text) {
            hub.report_progress(client_id, document_id, Stage::Error, 0, "no extractable text")
                .await;
            return Err(AppError::NoExtractableText);
        }

        hub.report_progress(client_id, document_id, Stage::Extracting, 30, "extraction complete")
            .await;

        let mut full_metadata = metadata;
        full_metadata.insert(
            "file_path".to_string(),
            Value::String(path.display().to_string()),
        );
        full_metadata.insert("char_count".to_string(), Value::from(extracted.char_count));
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            full_metadata.insert("filename".to_string(), Value::String(name.to_string()));
        }

        hub.report_progress(client_id, document_id, Stage::Chunking, 40, "splitting into chunks")
            .await;
        let chunks = self
            .chunker
            .chunk(document_id, &extracted.text, full_metadata.clone());
        let chunks_created = chunks.len();
        hub.report_progress(client_id, document_id, Stage::Chunking, 50, "chunking complete")
            .await;

        let mut chunks_added = 0usize;
        let total_batches = chunks_created.div_ceil(PROGRESS_BATCH_SIZE).max(1);
        for (batch_idx, batch) in chunks.chunks(PROGRESS_BATCH_SIZE).enumerate() {
            match self.store.add(batch.to_vec()).await {
                Ok(n) => chunks_added += n,
                Err(e) => {
                    hub.report_progress(client_id, document_id, Stage::Error, 0, &e.to_string())
                        .await;
                    return Err(e);
                }
            }
            let fraction = (batch_idx + 1) as f32 / total_batches as f32;
            let progress = 60 + (fraction * 30.0) as u8;
            hub.report_progress(
                client_id,
                document_id,
                Stage::Embedding,
                progress.min(90),
                &format!("embedded batch {}/{}", batch_idx + 1, total_batches),
            )
            .await;
        }

        hub.report_progress(client_id, document_id, Stage::Indexing, 95, "indexing")
            .await;
        hub.report_progress(client_id, document_id, Stage::Complete, 100, "ingest complete")
            .await;

        Ok(IngestResult {
            success: true,
            char_count: extracted.char_count,
            chunks_created,
            chunks_added,
            metadata: full_metadata,
        })
    }

    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        score_threshold: f32,
        document_ids: Option<&[String]>,
    ) -> SearchResponse {
        let start = Instant::now();
        match self.store.search(query, top_k, score_threshold, document_ids).await {
            Ok(hits) => SearchResponse {
                hits,
                elapsed_secs: start.elapsed().as_secs_f64(),
                success: true,
            },
            Err(_) => SearchResponse {
                hits: Vec::new(),
                elapsed_secs: start.elapsed().as_secs_f64(),
                success: false,
            },
        }
    }
}

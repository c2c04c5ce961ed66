//! Flat in-memory vector index persisted as a binary matrix plus a JSON
//! metadata sidecar. Single-writer/many-reader access is enforced by an
//! `RwLock` around both structures together, so they never drift apart.

use crate::chunker::Chunk;
use crate::embedder::Embedder;
use crate::error::{AppError, Result, StoreError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const VECTORS_FILE: &str = "vectors.bin";
const METADATA_FILE: &str = "metadata.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk: Chunk,
    pub score: f32,
}

#[derive(Debug, Clone)]
pub struct StoreStats {
    pub rows: usize,
    pub dim: usize,
    pub gpu: bool,
    pub model: String,
}

struct Inner {
    vectors: Vec<f32>, // row-major, rows * dim
    meta: Vec<Chunk>,
    dim: usize,
}

impl Inner {
    fn rows(&self) -> usize {
        self.meta.len()
    }

    fn row(&self, i: usize) -> &[f32] {
        &self.vectors[i * self.dim..(i + 1) * self.dim]
    }

    fn check_invariants(&self) -> Result<()> {
        if self.rows() * self.dim != self.vectors.len() {
            return Err(AppError::Store(StoreError::InvariantViolation(
                "vector buffer length does not match rows*dim".to_string(),
            )));
        }
        for (i, chunk) in self.meta.iter().enumerate() {
            if chunk.vector_index != i {
                return Err(AppError::Store(StoreError::InvariantViolation(format!(
                    "metadata entry {i} carries vector_index {}",
                    chunk.vector_index
                ))));
            }
        }
        Ok(())
    }
}

/// Normalizes in place to unit L2 norm; a zero vector is left untouched.
fn normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 1e-12 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

pub struct VectorStore {
    inner: RwLock<Inner>,
    embedder: Arc<dyn Embedder>,
    data_dir: PathBuf,
    model_name: String,
    gpu: bool,
}

impl VectorStore {
    /// Load persisted state from `data_dir` if present, otherwise start empty.
    pub async fn open(
        data_dir: impl Into<PathBuf>,
        embedder: Arc<dyn Embedder>,
        model_name: impl Into<String>,
        gpu: bool,
    ) -> Result<Self> {
        let data_dir = data_dir.into();
        std::fs::create_dir_all(&data_dir)?;

        let dim = embedder.dim();
        let meta_path = data_dir.join(METADATA_FILE);
        let vec_path = data_dir.join(VECTORS_FILE);

        let (vectors, meta) = if meta_path.exists() && vec_path.exists() {
            let meta: Vec<Chunk> = serde_json::from_slice(&std::fs::read(&meta_path)?)?;
            let bytes = std::fs::read(&vec_path)?;
            let vectors = bytes_to_f32(&bytes);
            (vectors, meta)
        } else {
            (Vec::new(), Vec::new())
        };

        let inner = Inner { vectors, meta, dim };
        inner.check_invariants()?;
        info!("vector store opened at {} with {} rows", data_dir.display(), inner.rows());

        Ok(Self {
            inner: RwLock::new(inner),
            embedder,
            data_dir,
            model_name: model_name.into(),
            gpu,
        })
    }

    /// Embed, normalize, and append `chunks`. On any failure the in-memory
    /// state is left exactly as it was before the call.
    pub async fn add(&self, mut chunks: Vec<Chunk>) -> Result<usize> {
        if chunks.is_empty() {
            return Ok(0);
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let mut embeddings = self.embedder.embed_batch(&texts).await?;
        for row in embeddings.iter_mut() {
            normalize(row);
        }

        let mut guard = self.inner.write().await;
        let start = guard.rows();
        for (i, chunk) in chunks.iter_mut().enumerate() {
            chunk.vector_index = start + i;
        }

        let snapshot_vectors = guard.vectors.clone();
        let snapshot_meta = guard.meta.clone();

        for row in &embeddings {
            guard.vectors.extend_from_slice(row);
        }
        guard.meta.extend(chunks.iter().cloned());

        if let Err(e) = self.persist(&guard).await {
            guard.vectors = snapshot_vectors;
            guard.meta = snapshot_meta;
            warn!("persisting vector store failed, reverted in-memory state: {e}");
            return Err(e);
        }

        debug!("added {} chunks, store now has {} rows", chunks.len(), guard.rows());
        Ok(chunks.len())
    }

    /// Search for the `top_k` chunks most similar to `query` above
    /// `score_threshold`. When `document_ids` is given, restrict the search
    /// to chunks belonging to those documents without rebuilding an index.
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        score_threshold: f32,
        document_ids: Option<&[String]>,
    ) -> Result<Vec<SearchHit>> {
        let mut query_vec = self.embedder.embed_query(query).await?;
        normalize(&mut query_vec);

        let guard = self.inner.read().await;
        let candidate_indices: Vec<usize> = match document_ids {
            Some(ids) => (0..guard.rows())
                .filter(|&i| ids.contains(&guard.meta[i].document_id))
                .collect(),
            None => (0..guard.rows()).collect(),
        };

        let mut scored: Vec<(usize, f32)> = candidate_indices
            .into_iter()
            .map(|i| {
                let score: f32 = guard
                    .row(i)
                    .iter()
                    .zip(query_vec.iter())
                    .map(|(a, b)| a * b)
                    .sum();
                (i, score)
            })
            .filter(|(_, score)| *score >= score_threshold)
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| SearchHit {
                chunk: guard.meta[i].clone(),
                score,
            })
            .collect())
    }

    pub async fn clear(&self) -> Result<()> {
        let mut guard = self.inner.write().await;
        guard.vectors.clear();
        guard.meta.clear();
        self.persist(&guard).await?;
        info!("vector store cleared");
        Ok(())
    }

    pub async fn stats(&self) -> StoreStats {
        let guard = self.inner.read().await;
        StoreStats {
            rows: guard.rows(),
            dim: guard.dim,
            gpu: self.gpu,
            model: self.model_name.clone(),
        }
    }

    async fn persist(&self, guard: &Inner) -> Result<()> {
        guard.check_invariants()?;
        let meta_json = serde_json::to_vec(&guard.meta)?;
        let vec_bytes = f32_to_bytes(&guard.vectors);

        let meta_path = self.data_dir.join(METADATA_FILE);
        let vec_path = self.data_dir.join(VECTORS_FILE);
        let meta_tmp = self.data_dir.join(format!("{METADATA_FILE}.tmp"));
        let vec_tmp = self.data_dir.join(format!("{VECTORS_FILE}.tmp"));

        std::fs::write(&meta_tmp, &meta_json)?;
        std::fs::write(&vec_tmp, &vec_bytes)?;
        std::fs::rename(&meta_tmp, &meta_path)?;
        std::fs::rename(&vec_tmp, &vec_path)?;
        Ok(())
    }
}

fn f32_to_bytes(v: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(v.len() * 4);
    for x in v {
        out.extend_from_slice(&x.to_le_bytes());
    }
    out
}

fn bytes_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

//! Turns a user question into an answer: search, context assembly, prompt
//! composition, generation, and persistence.

use crate::error::{AppError, Result};
use crate::llm::{system_message, user_message, BackendRouter, Message};
use crate::rag::RagOrchestrator;
use crate::storage::{QueryRecord as StoredQueryRecord, Storage};
use crate::vector_store::SearchHit;
use chrono::Utc;
use serde::Serialize;
use std::time::Instant;

const CONTEXT_CHAR_BUDGET: usize = 3500;
const NO_RESULTS_ANSWER: &str =
    "I don't have enough information in the provided context to answer this question.";
const PIPELINE_ERROR_ANSWER: &str =
    "Sorry, something went wrong while answering your question. Please try again.";
const LLM_FAILURE_ANSWER: &str =
    "I apologize, but I encountered an error while processing your question. Please try again later.";

const SYSTEM_PROMPT: &str = "You are a helpful assistant that answers questions accurately based on provided context. If you don't know the answer, say so clearly.";

#[derive(Debug, Clone, Serialize)]
pub struct SourceEntry {
    pub document: String,
    pub similarity: f32,
    pub preview: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct AskResponse {
    pub answer: String,
    pub sources: Vec<SourceEntry>,
    pub llm_used: String,
    pub success: bool,
    pub response_time: f64,
}

#[derive(Clone)]
pub struct QueryPipeline {
    orchestrator: RagOrchestrator,
    router: BackendRouter,
    storage: Storage,
}

struct DocumentLookup<'a> {
    storage: &'a Storage,
}

impl<'a> DocumentLookup<'a> {
    async fn name_for(&self, document_id: &str) -> String {
        match self.storage.get_document(document_id).await {
            Ok(Some(doc)) => doc.filename,
            _ => format!("Document {document_id}"),
        }
    }
}

impl QueryPipeline {
    pub fn new(orchestrator: RagOrchestrator, router: BackendRouter, storage: Storage) -> Self {
        Self {
            orchestrator,
            router,
            storage,
        }
    }

    pub async fn ask(
        &self,
        question: &str,
        top_k: usize,
        score_threshold: f32,
        max_tokens: u32,
        temperature: f32,
    ) -> Result<AskResponse> {
        validate_ask_inputs(question, top_k, score_threshold)?;

        let start = Instant::now();
        match self.ask_inner(question, top_k, score_threshold, max_tokens, temperature, start).await {
            Ok(response) => Ok(response),
            Err(e) => {
                self.persist_failure(question, start.elapsed().as_secs_f64(), PIPELINE_ERROR_ANSWER)
                    .await;
                Err(e)
            }
        }
    }

    async fn ask_inner(
        &self,
        question: &str,
        top_k: usize,
        score_threshold: f32,
        max_tokens: u32,
        temperature: f32,
        start: Instant,
    ) -> Result<AskResponse> {
        let search_response = self.orchestrator.search(question, top_k, score_threshold, None).await;
        if !search_response.success {
            return Err(AppError::Validation("search failed".to_string()));
        }

        if search_response.hits.is_empty() {
            let response = AskResponse {
                answer: NO_RESULTS_ANSWER.to_string(),
                sources: Vec::new(),
                llm_used: "none".to_string(),
                success: true,
                response_time: start.elapsed().as_secs_f64(),
            };
            self.persist_success(question, &response, 0).await;
            return Ok(response);
        }

        let lookup = DocumentLookup { storage: &self.storage };
        let mut enriched: Vec<(String, SearchHit)> = Vec::with_capacity(search_response.hits.len());
        for hit in search_response.hits {
            let name = lookup.name_for(&hit.chunk.document_id).await;
            enriched.push((name, hit));
        }
        enriched.sort_by(|a, b| b.1.score.partial_cmp(&a.1.score).unwrap_or(std::cmp::Ordering::Equal));

        let context_chunks_count = enriched.len();
        let context = build_context(&enriched);
        let prompt = render_prompt(&context, question);

        let messages: Vec<Message> = vec![system_message(SYSTEM_PROMPT), user_message(prompt)];
        let generated = self
            .router
            .generate_with_fallback(&messages, max_tokens, temperature)
            .await;

        let (generation, llm_used) = match generated {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!("generation failed, returning apology response: {e}");
                let response = AskResponse {
                    answer: LLM_FAILURE_ANSWER.to_string(),
                    sources: Vec::new(),
                    llm_used: "none".to_string(),
                    success: false,
                    response_time: start.elapsed().as_secs_f64(),
                };
                self.persist_failure(question, response.response_time, LLM_FAILURE_ANSWER)
                    .await;
                return Ok(response);
            }
        };

        let sources = format_sources(&enriched);

        let response = AskResponse {
            answer: generation.text,
            sources,
            llm_used,
            success: true,
            response_time: start.elapsed().as_secs_f64(),
        };
        self.persist_success(question, &response, context_chunks_count).await;
        Ok(response)
    }

    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        score_threshold: f32,
    ) -> crate::rag::SearchResponse {
        self.orchestrator.search(query, top_k, score_threshold, None).await
    }

    async fn persist_success(&self, question: &str, response: &AskResponse, context_chunks_count: usize) {
        let record = StoredQueryRecord {
            id: 0,
            question: question.to_string(),
            answer: Some(response.answer.clone()),
            sources_count: response.sources.len() as i64,
            response_time: response.response_time,
            llm_used: Some(response.llm_used.clone()),
            context_chunks_count: context_chunks_count as i64,
            success: true,
            similarity_hash: similarity_hash(question),
            created_at: Utc::now(),
        };
        if let Err(e) = self.storage.insert_query_record(&record).await {
            tracing::warn!("failed to persist query record: {e}");
        }
    }

    async fn persist_failure(&self, question: &str, response_time: f64, answer: &str) {
        let record = StoredQueryRecord {
            id: 0,
            question: question.to_string(),
            answer: Some(answer.to_string()),
            sources_count: 0,
            response_time,
            llm_used: None,
            context_chunks_count: 0,
            success: false,
            similarity_hash: similarity_hash(question),
            created_at: Utc::now(),
        };
        if let Err(e) = self.storage.insert_query_record(&record).await {
            tracing::warn!("failed to persist failed query record: {e}");
        }
    }
}

fn validate_ask_inputs(question: &str, top_k: usize, score_threshold: f32) -> Result<()> {
    let len = question.chars().count();
    if !(3..=1000).contains(&len) {
        return Err(AppError::Validation(format!(
            "question length {len} out of range [3, 1000]"
        )));
    }
    if !(1..=20).contains(&top_k) {
        return Err(AppError::Validation(format!("top_k {top_k} out of range [1, 20]")));
    }
    if !(0.0..=1.0).contains(&score_threshold) {
        return Err(AppError::Validation(format!(
            "score_threshold {score_threshold} out of range [0, 1]"
        )));
    }
    Ok(())
}

fn build_context(enriched: &[(String, SearchHit)]) -> String {
    let mut out = String::new();
    let mut used = 0usize;
    for (i, (name, hit)) in enriched.iter().enumerate() {
        let piece = format!("[Source {}: {}]\n{}", i + 1, name, hit.chunk.text);
        if used + piece.chars().count() > CONTEXT_CHAR_BUDGET && !out.is_empty() {
            break;
        }
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&piece);
        used += piece.chars().count();
    }
    out
}

fn render_prompt(context: &str, question: &str) -> String {
    format!(
        "Based on the following context information, please provide a comprehensive and accurate answer to the question. If the context doesn't contain sufficient information to answer the question completely, please state what you can determine from the context and clearly indicate what information is missing.\n\nCONTEXT:\n{context}\n\nQUESTION: {question}\n\nINSTRUCTIONS:\n- Provide a clear, direct answer based only on the information in the context\n- If you cannot find the answer in the context, say \"I don't have enough information in the provided context to answer this question\"\n- Be specific and cite relevant details from the context when possible (e.g., [Source X: Document Name])\n- Keep your answer focused and concise\n\nANSWER:"
    )
}

fn format_sources(enriched: &[(String, SearchHit)]) -> Vec<SourceEntry> {
    let mut seen = std::collections::HashSet::new();
    let mut sources = Vec::new();
    for (name, hit) in enriched {
        if !seen.insert(name.clone()) {
            continue;
        }
        let preview: String = hit.chunk.text.chars().take(200).collect();
        sources.push(SourceEntry {
            document: name.clone(),
            similarity: (hit.score * 1000.0).round() / 1000.0,
            preview,
        });
        if sources.len() == 3 {
            break;
        }
    }
    sources
}

/// MD5 hex of the normalized question: lowercased, trimmed, with `?`, `.`,
/// `,` removed — buckets equivalent questions for analytics.
pub fn similarity_hash(question: &str) -> String {
    let normalized: String = question
        .trim()
        .to_lowercase()
        .chars()
        .filter(|c| !matches!(c, '?' | '.' | ','))
        .collect();
    format!("{:x}", md5::compute(normalized))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_ask_inputs_rejects_short_question() {
        assert!(validate_ask_inputs("hi", 5, 0.3).is_err());
    }

    #[test]
    fn test_validate_ask_inputs_rejects_bad_top_k() {
        assert!(validate_ask_inputs("a reasonable question", 0, 0.3).is_err());
        assert!(validate_ask_inputs("a reasonable question", 21, 0.3).is_err());
    }

    #[test]
    fn test_similarity_hash_normalizes_punctuation_and_case() {
        let a = similarity_hash("What is Rust?");
        let b = similarity_hash("what is rust");
        assert_eq!(a, b);
    }

    #[test]
    fn test_render_prompt_matches_literal_template() {
        let prompt = render_prompt("some context", "what is rust?");
        assert!(prompt.starts_with("Based on the following context information"));
        assert!(prompt.contains("CONTEXT:\nsome context"));
        assert!(prompt.contains("QUESTION: what is rust?"));
        assert!(prompt.ends_with("ANSWER:"));
    }

    #[test]
    fn test_format_sources_dedupes_by_document_and_caps_at_three() {
        use crate::chunker::Chunk;
        use std::collections::HashMap;

        let mk = |doc: &str, idx: usize, score: f32| {
            (
                doc.to_string(),
                SearchHit {
                    chunk: Chunk {
                        chunk_id: format!("{doc}_chunk_{idx}"),
                        document_id: doc.to_string(),
                        chunk_index: idx,
                        text: "x".repeat(250),
                        char_count: 250,
                        metadata: HashMap::new(),
                        vector_index: idx,
                    },
                    score,
                },
            )
        };

        let enriched = vec![
            mk("a", 0, 0.9),
            mk("a", 1, 0.8),
            mk("b", 0, 0.7),
            mk("c", 0, 0.6),
            mk("d", 0, 0.5),
        ];

        let sources = format_sources(&enriched);
        assert_eq!(sources.len(), 3);
        assert_eq!(sources[0].document, "a");
        assert_eq!(sources[0].preview.chars().count(), 200);
    }
}

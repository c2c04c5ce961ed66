//! Splits extracted document text into overlapping, semantically sized windows.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A single retrieval unit produced by the chunker.
///
/// `vector_index` is a placeholder until the chunk is handed to the vector
/// store, which assigns the real row and overwrites it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: String,
    pub document_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub char_count: usize,
    pub metadata: HashMap<String, serde_json::Value>,
    #[serde(default)]
    pub vector_index: usize,
}

/// Cascading separator preference, tried in order against the window's tail.
const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", "! ", "? ", "; ", ", ", " "];

#[derive(Debug, Clone)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Chunker {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size.saturating_sub(1).max(1)),
        }
    }

    /// Split `text` into chunks tagged with `document_id` and the given shared metadata.
    pub fn chunk(
        &self,
        document_id: &str,
        text: &str,
        metadata: HashMap<String, serde_json::Value>,
    ) -> Vec<Chunk> {
        let cleaned = clean_whitespace(text);
        self.split(&cleaned)
            .into_iter()
            .enumerate()
            .map(|(i, window)| Chunk {
                chunk_id: format!("{document_id}_chunk_{i}"),
                document_id: document_id.to_string(),
                chunk_index: i,
                char_count: window.chars().count(),
                text: window,
                metadata: metadata.clone(),
                vector_index: 0,
            })
            .collect()
    }

    /// Split cleaned text into windows of at most `chunk_size` characters, each
    /// overlapping the next by up to `chunk_overlap` characters.
    fn split(&self, text: &str) -> Vec<String> {
        if text.trim().is_empty() {
            return Vec::new();
        }

        let chars: Vec<char> = text.chars().collect();
        let len = chars.len();
        let mut windows = Vec::new();
        let mut start = 0usize;

        while start < len {
            let end = (start + self.chunk_size).min(len);
            let candidate: String = chars[start..end].iter().collect();

            let window = if end < len {
                self.find_boundary(&candidate)
            } else {
                candidate
            };

            if !window.trim().is_empty() {
                windows.push(window.clone());
            }

            let advance = window.chars().count().saturating_sub(self.chunk_overlap).max(1);
            start += advance;
        }

        windows
    }

    /// Trim `candidate` back to the last occurrence of the highest-preference
    /// separator found in it, falling back to the raw candidate (a hard
    /// character-level cut) when none of the separators occur.
    fn find_boundary(&self, candidate: &str) -> String {
        for sep in SEPARATORS {
            if let Some(pos) = candidate.rfind(sep) {
                let cut = pos + sep.len();
                if cut > 0 {
                    return candidate[..cut].to_string();
                }
            }
        }
        candidate.to_string()
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self::new(1000, 200)
    }
}

/// Collapse runs of whitespace the same way the extractor normalizes text.
fn clean_whitespace(text: &str) -> String {
    let mut collapsed_newlines = String::with_capacity(text.len());
    let mut newline_run = 0;
    for c in text.chars() {
        if c == '\n' {
            newline_run += 1;
            if newline_run <= 2 {
                collapsed_newlines.push(c);
            }
        } else {
            newline_run = 0;
            collapsed_newlines.push(c);
        }
    }

    let mut result = String::with_capacity(collapsed_newlines.len());
    let mut prev_space = false;
    for c in collapsed_newlines.chars() {
        if c == ' ' || c == '\t' {
            if !prev_space {
                result.push(' ');
            }
            prev_space = true;
        } else {
            result.push(c);
            prev_space = false;
        }
    }

    result.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> HashMap<String, serde_json::Value> {
        HashMap::new()
    }

    #[test]
    fn test_chunk_short_text() {
        let chunker = Chunker::default();
        let chunks = chunker.chunk("doc1", "This is a short text.", meta());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "This is a short text.");
        assert_eq!(chunks[0].chunk_id, "doc1_chunk_0");
    }

    #[test]
    fn test_chunk_empty_text_yields_no_chunks() {
        let chunker = Chunker::default();
        let chunks = chunker.chunk("doc1", "   \n\n  ", meta());
        assert!(chunks.is_empty());
    }

    #[test]
    fn test_chunk_long_text_respects_size_and_ids() {
        let chunker = Chunker::new(50, 10);
        let text = "This is sentence one. This is sentence two. This is sentence three. This is sentence four.";
        let chunks = chunker.chunk("doc2", text, meta());

        assert!(chunks.len() > 1, "long text should be split into multiple chunks");
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i);
            assert_eq!(c.chunk_id, format!("doc2_chunk_{i}"));
            assert!(c.text.chars().count() <= 50);
        }
    }

    #[test]
    fn test_chunk_always_makes_progress() {
        // Text with no separators at all should still terminate.
        let chunker = Chunker::new(10, 9);
        let text = "a".repeat(100);
        let chunks = chunker.chunk("doc3", &text, meta());
        assert!(!chunks.is_empty());
        assert!(chunks.len() < 100);
    }

    #[test]
    fn test_metadata_is_propagated() {
        let chunker = Chunker::default();
        let mut m = HashMap::new();
        m.insert("filename".to_string(), serde_json::json!("a.txt"));
        let chunks = chunker.chunk("doc4", "hello world", m.clone());
        assert_eq!(chunks[0].metadata.get("filename"), m.get("filename"));
    }
}

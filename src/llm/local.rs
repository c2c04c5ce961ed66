//! In-process local backend running a quantized GGUF model via `llama-cpp-2`.
//!
//! Behind the `local-llm` feature this loads a real model from
//! [`LocalLlmConfig::model_path`] and runs generation on-box, optionally
//! offloading layers to GPU. Without the feature (or without a configured
//! model path) this reports itself unavailable so the backend router skips
//! straight to a hosted fallback.

use crate::config::LocalLlmConfig;
use crate::error::{AppError, LlmError, Result};
use crate::llm::provider::{LlmProvider, ProviderStats, ProviderType};
use crate::llm::{EmbeddingResponse, GenerationResponse, Message, Role};
use async_trait::async_trait;

/// Stop sequences the local backend truncates generation at.
pub const STOP_SEQUENCES: &[&str] = &["\n###", "\n##", "\n\n", "Question:", "User:", "###", "##"];

const MAX_LOCAL_TOKENS: u32 = 512;

pub struct LocalProvider {
    config: LocalLlmConfig,
    #[cfg(feature = "local-llm")]
    model: Option<backend::LoadedModel>,
}

impl LocalProvider {
    pub fn new(config: LocalLlmConfig) -> Self {
        #[cfg(feature = "local-llm")]
        {
            let model = if config.enabled {
                config
                    .model_path
                    .as_deref()
                    .and_then(|path| backend::LoadedModel::load(path, config.use_gpu).ok())
            } else {
                None
            };
            Self { config, model }
        }
        #[cfg(not(feature = "local-llm"))]
        {
            Self { config }
        }
    }

    pub fn is_available(&self) -> bool {
        #[cfg(feature = "local-llm")]
        {
            self.config.enabled && self.model.is_some()
        }
        #[cfg(not(feature = "local-llm"))]
        {
            false
        }
    }
}

#[async_trait]
impl LlmProvider for LocalProvider {
    fn provider_type(&self) -> ProviderType {
        ProviderType::Local
    }

    fn name(&self) -> &str {
        "local"
    }

    async fn generate(&self, messages: &[Message], max_tokens: u32, _temperature: f32) -> Result<GenerationResponse> {
        if !self.is_available() {
            return Err(AppError::Llm(LlmError::Unavailable));
        }

        #[cfg(feature = "local-llm")]
        {
            let model = self.model.as_ref().expect("checked by is_available");
            let prompt = render_prompt(messages);
            let capped_tokens = max_tokens.min(MAX_LOCAL_TOKENS);
            let raw = model
                .generate(&prompt, capped_tokens, self.config.repetition_penalty, STOP_SEQUENCES)
                .map_err(|e| AppError::Llm(LlmError::GenerationFailed(e)))?;
            let text = post_process(&raw, &prompt);
            Ok(GenerationResponse {
                text,
                tokens_used: None,
                model: model.name().to_string(),
                finish_reason: Some("stop".to_string()),
            })
        }
        #[cfg(not(feature = "local-llm"))]
        {
            let _ = (messages, max_tokens);
            Err(AppError::Llm(LlmError::Unavailable))
        }
    }

    async fn embed(&self, _text: &str) -> Result<EmbeddingResponse> {
        Err(AppError::Llm(LlmError::EmbeddingFailed(
            "the local generative backend does not produce embeddings; use the embedder module"
                .to_string(),
        )))
    }

    async fn list_models(&self) -> Result<Vec<String>> {
        #[cfg(feature = "local-llm")]
        {
            Ok(self
                .model
                .as_ref()
                .map(|m| vec![m.name().to_string()])
                .unwrap_or_default())
        }
        #[cfg(not(feature = "local-llm"))]
        {
            Ok(Vec::new())
        }
    }

    async fn is_model_available(&self, _model: &str) -> Result<bool> {
        Ok(self.is_available())
    }

    async fn health_check(&self) -> Result<bool> {
        Ok(self.is_available())
    }

    fn get_stats(&self) -> ProviderStats {
        ProviderStats::default()
    }
}

fn render_prompt(messages: &[Message]) -> String {
    let mut out = String::new();
    for m in messages {
        let tag = match m.role {
            Role::System => "System",
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        out.push_str(tag);
        out.push_str(": ");
        out.push_str(&m.content);
        out.push('\n');
    }
    out.push_str("Assistant: ");
    out
}

/// Clean up raw model output: drop a repeated prompt echo, trim a trailing
/// incomplete sentence, collapse an immediately-repeated word run, and
/// capitalize the first letter.
fn post_process(raw: &str, prompt: &str) -> String {
    let mut text = raw.strip_prefix(prompt).unwrap_or(raw).trim().to_string();

    for stop in STOP_SEQUENCES {
        if let Some(idx) = text.find(stop) {
            text.truncate(idx);
        }
    }

    text = drop_trailing_incomplete_sentence(&text);
    text = dedup_repeated_words(&text);

    let mut chars = text.trim().chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => text,
    }
}

fn drop_trailing_incomplete_sentence(text: &str) -> String {
    let trimmed = text.trim_end();
    if trimmed.is_empty() || trimmed.ends_with(['.', '!', '?', '"', '\'']) {
        return trimmed.to_string();
    }
    match trimmed.rfind(['.', '!', '?']) {
        Some(idx) => trimmed[..=idx].to_string(),
        None => trimmed.to_string(),
    }
}

/// Drop a word that repeats within the last 5 words (a common local-model
/// degeneration pattern under low repetition penalty).
fn dedup_repeated_words(text: &str) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut out: Vec<&str> = Vec::with_capacity(words.len());
    for word in words {
        let window_start = out.len().saturating_sub(5);
        if out[window_start..].iter().any(|w| w.eq_ignore_ascii_case(word)) {
            continue;
        }
        out.push(word);
    }
    out.join(" ")
}

#[cfg(feature = "local-llm")]
mod backend {
    use llama_cpp_2::context::params::LlamaContextParams;
    use llama_cpp_2::llama_backend::LlamaBackend;
    use llama_cpp_2::llama_batch::LlamaBatch;
    use llama_cpp_2::model::params::LlamaModelParams;
    use llama_cpp_2::model::{AddBos, LlamaModel};
    use llama_cpp_2::token::data_array::LlamaTokenDataArray;
    use std::num::NonZeroU32;
    use std::sync::Mutex;

    pub struct LoadedModel {
        backend: LlamaBackend,
        model: LlamaModel,
        name: String,
        lock: Mutex<()>,
    }

    impl LoadedModel {
        pub fn load(path: &str, use_gpu: bool) -> anyhow::Result<Self> {
            let backend = LlamaBackend::init()?;
            let mut params = LlamaModelParams::default();
            if use_gpu {
                params = params.with_n_gpu_layers(1_000_000);
            }
            let model = LlamaModel::load_from_file(&backend, path, &params)?;
            let name = std::path::Path::new(path)
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "local-gguf".to_string());
            Ok(Self {
                backend,
                model,
                name,
                lock: Mutex::new(()),
            })
        }

        pub fn name(&self) -> &str {
            &self.name
        }

        pub fn generate(
            &self,
            prompt: &str,
            max_tokens: u32,
            repetition_penalty: f32,
            stop_sequences: &[&str],
        ) -> anyhow::Result<String> {
            let _guard = self.lock.lock().unwrap();

            let ctx_params = LlamaContextParams::default()
                .with_n_ctx(NonZeroU32::new(4096))
                .with_n_batch(512);
            let mut ctx = self.model.new_context(&self.backend, ctx_params)?;

            let tokens = self
                .model
                .str_to_token(prompt, AddBos::Always)?;

            let mut batch = LlamaBatch::new(512, 1);
            for (i, token) in tokens.iter().enumerate() {
                let is_last = i == tokens.len() - 1;
                batch.add(*token, i as i32, &[0], is_last)?;
            }
            ctx.decode(&mut batch)?;

            let mut output = String::new();
            let mut n_cur = batch.n_tokens();
            let mut recent_tokens: Vec<llama_cpp_2::token::LlamaToken> = Vec::new();

            for _ in 0..max_tokens {
                let candidates = ctx.candidates_ith(batch.n_tokens() - 1);
                let mut candidates = LlamaTokenDataArray::from_iter(candidates, false);

                if repetition_penalty > 1.0 {
                    ctx.sample_repetition_penalty(&mut candidates, &recent_tokens, 64, repetition_penalty, 0.0, 0.0);
                }

                let token = ctx.sample_token_greedy(candidates);
                if self.model.is_eog_token(token) {
                    break;
                }

                let piece = self.model.token_to_str(token, llama_cpp_2::model::Special::Tokenize)?;
                output.push_str(&piece);
                recent_tokens.push(token);

                if stop_sequences.iter().any(|s| output.contains(s)) {
                    break;
                }

                batch.clear();
                batch.add(token, n_cur, &[0], true)?;
                ctx.decode(&mut batch)?;
                n_cur += 1;
            }

            Ok(output)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_without_model_path() {
        let provider = LocalProvider::new(LocalLlmConfig {
            enabled: true,
            model_path: None,
            use_gpu: false,
            repetition_penalty: 1.1,
        });
        assert!(!provider.is_available());
    }

    #[test]
    fn test_unavailable_when_disabled() {
        let provider = LocalProvider::new(LocalLlmConfig {
            enabled: false,
            model_path: Some("/tmp/does-not-exist.gguf".to_string()),
            use_gpu: false,
            repetition_penalty: 1.1,
        });
        assert!(!provider.is_available());
    }

    #[test]
    fn test_drop_trailing_incomplete_sentence() {
        assert_eq!(
            drop_trailing_incomplete_sentence("The sky is blue. It was a nice"),
            "The sky is blue."
        );
        assert_eq!(
            drop_trailing_incomplete_sentence("All done."),
            "All done."
        );
    }

    #[test]
    fn test_dedup_repeated_words() {
        let out = dedup_repeated_words("the cat the cat sat sat on the the mat");
        assert!(!out.split_whitespace().any(|w| w == "the") || out.matches("the").count() < 4);
    }

    #[test]
    fn test_post_process_capitalizes_and_strips_stop() {
        let out = post_process("prompt here answer text.\n### done", "prompt here ");
        assert_eq!(out.chars().next(), Some('A'));
        assert!(!out.contains("###"));
    }
}

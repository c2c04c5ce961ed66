//! Routes generation and embedding calls across the configured backends,
//! falling back in order when one fails or returns an error-like answer.

use crate::cache::LlmCache;
use crate::config::LlmConfig;
use crate::error::{AppError, LlmError, Result};
use crate::llm::local::LocalProvider;
use crate::llm::provider::{LlmProvider, ProviderConfig, ProviderType};
use crate::llm::providers::{GroqProvider, OpenAIProvider};
use crate::llm::{is_error_like, EmbeddingResponse, GenerationResponse, Message, Role};
use std::sync::Arc;
use tracing::{debug, warn};

/// Holds whichever backends are configured and picks an ordered
/// primary/fallback chain to try on each call.
#[derive(Clone)]
pub struct BackendRouter {
    local: Option<Arc<dyn LlmProvider>>,
    openai: Option<Arc<dyn LlmProvider>>,
    groq: Option<Arc<dyn LlmProvider>>,
    prefer_local: bool,
    cache: Option<Arc<LlmCache>>,
}

fn transcript_of(messages: &[Message]) -> String {
    messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::System => "system",
                Role::User => "user",
                Role::Assistant => "assistant",
            };
            format!("{role}:{}", m.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

impl BackendRouter {
    /// Build a router from configuration, constructing each enabled backend
    /// and, if enabled, the SQLite-backed response cache in front of them.
    pub async fn from_config(config: &LlmConfig) -> Self {
        let cache = if config.cache.enabled {
            match LlmCache::new(config.cache.clone()).await {
                Ok(cache) => Some(Arc::new(cache)),
                Err(e) => {
                    warn!("failed to initialize LLM response cache, continuing without it: {e}");
                    None
                }
            }
        } else {
            None
        };

        let local = {
            let provider = LocalProvider::new(config.local.clone());
            if provider.is_available() {
                Some(Arc::new(provider) as Arc<dyn LlmProvider>)
            } else {
                None
            }
        };

        let openai = config.openai.enabled.then(|| {
            OpenAIProvider::create(ProviderConfig {
                provider: ProviderType::OpenAI,
                name: "openai".to_string(),
                api_key: config.openai.api_key.clone(),
                base_url: config.openai.base_url.clone(),
                text_model: config.openai.text_model.clone(),
                embedding_model: config.openai.embedding_model.clone(),
                max_tokens: config.max_tokens,
                temperature: config.temperature,
                timeout: config.timeout,
                options: serde_json::Value::Null,
            })
        });

        let groq = config.groq.enabled.then(|| {
            GroqProvider::create(ProviderConfig {
                provider: ProviderType::Groq,
                name: "groq".to_string(),
                api_key: config.groq.api_key.clone(),
                base_url: config.groq.base_url.clone(),
                text_model: config.groq.text_model.clone(),
                embedding_model: config.groq.embedding_model.clone(),
                max_tokens: config.max_tokens,
                temperature: config.temperature,
                timeout: config.timeout,
                options: serde_json::Value::Null,
            })
        });

        Self {
            local,
            openai,
            groq,
            prefer_local: config.prefer_local,
            cache,
        }
    }

    /// Builds a router around a single already-constructed provider, for
    /// callers that already have a provider instance rather than a
    /// [`LlmConfig`] to build one from (tests, embedded/programmatic setup).
    pub fn from_provider(provider: Arc<dyn LlmProvider>) -> Self {
        Self {
            local: None,
            openai: Some(provider),
            groq: None,
            prefer_local: false,
            cache: None,
        }
    }

    /// Backends in the order they should be tried, honoring `prefer_local`.
    fn ordered_backends(&self) -> Vec<&Arc<dyn LlmProvider>> {
        let mut order: Vec<&Arc<dyn LlmProvider>> = Vec::with_capacity(3);
        if self.prefer_local {
            order.extend(self.local.as_ref());
            order.extend(self.openai.as_ref());
            order.extend(self.groq.as_ref());
        } else {
            order.extend(self.openai.as_ref());
            order.extend(self.groq.as_ref());
            order.extend(self.local.as_ref());
        }
        order
    }

    /// Generate with the ordered backend chain, falling through on hard
    /// errors or error-like text. Returns the response and the name of the
    /// backend that produced it. Checks the response cache first and, on a
    /// fresh generation, populates it — disabling the cache changes only
    /// latency, never which answer comes back.
    pub async fn generate_with_fallback(
        &self,
        messages: &[Message],
        max_tokens: u32,
        temperature: f32,
    ) -> Result<(GenerationResponse, String)> {
        let backends = self.ordered_backends();
        if backends.is_empty() {
            return Err(AppError::Llm(LlmError::Unavailable));
        }

        let cache_key = self.cache.as_ref().map(|_| {
            LlmCache::compute_cache_key(&transcript_of(messages), "router", temperature, max_tokens, None)
        });

        if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
            if let Ok(Some(cached)) = cache.get(key).await {
                debug!("serving cached answer for key {key}");
                return Ok((
                    GenerationResponse {
                        text: cached,
                        tokens_used: None,
                        model: "cache".to_string(),
                        finish_reason: Some("cache".to_string()),
                    },
                    "cache".to_string(),
                ));
            }
        }

        let mut last_err: Option<AppError> = None;
        for backend in backends {
            match backend.generate(messages, max_tokens, temperature).await {
                Ok(response) if is_error_like(&response.text) => {
                    warn!("{} returned an error-like answer, trying fallback", backend.name());
                    last_err = Some(AppError::Llm(LlmError::GenerationFailed(response.text)));
                }
                Ok(response) => {
                    if let (Some(cache), Some(key)) = (&self.cache, &cache_key) {
                        if let Err(e) = cache
                            .set(key.clone(), response.text.clone(), "router".to_string(), temperature)
                            .await
                        {
                            debug!("failed to store cached answer: {e}");
                        }
                    }
                    return Ok((response, backend.name().to_string()));
                }
                Err(e) => {
                    debug!("{} failed: {e}", backend.name());
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or(AppError::Llm(LlmError::AllProvidersFailed)))
    }

    /// Embed with the ordered backend chain. The local generative backend
    /// never produces embeddings, so this effectively routes to whichever
    /// hosted backend is configured first.
    pub async fn embed_with_fallback(&self, text: &str) -> Result<(EmbeddingResponse, String)> {
        let backends = self.ordered_backends();
        if backends.is_empty() {
            return Err(AppError::Llm(LlmError::Unavailable));
        }

        let mut last_err: Option<AppError> = None;
        for backend in backends {
            match backend.embed(text).await {
                Ok(response) => return Ok((response, backend.name().to_string())),
                Err(e) => {
                    debug!("{} embed failed: {e}", backend.name());
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or(AppError::Llm(LlmError::AllProvidersFailed)))
    }

    /// Administrative override: flip which backend is tried first.
    pub fn set_prefer_local(&mut self, prefer_local: bool) {
        self.prefer_local = prefer_local;
    }

    /// Health summary across every configured backend.
    pub async fn status(&self) -> Vec<(String, bool)> {
        let mut out = Vec::new();
        for backend in self.ordered_backends() {
            let healthy = backend.health_check().await.unwrap_or(false);
            out.push((backend.name().to_string(), healthy));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HostedLlmConfig, LocalLlmConfig};
    use crate::llm::{EmbeddingResponse, GenerationResponse};
    use async_trait::async_trait;

    struct StubProvider {
        ptype: ProviderType,
        response: std::result::Result<String, ()>,
    }

    #[async_trait]
    impl LlmProvider for StubProvider {
        fn provider_type(&self) -> ProviderType {
            self.ptype
        }

        fn name(&self) -> &str {
            match self.ptype {
                ProviderType::Local => "local",
                ProviderType::OpenAI => "openai",
                ProviderType::Groq => "groq",
            }
        }

        async fn generate(&self, _messages: &[Message], _max_tokens: u32, _temperature: f32) -> Result<GenerationResponse> {
            match &self.response {
                Ok(text) => Ok(GenerationResponse {
                    text: text.clone(),
                    tokens_used: Some(10),
                    model: self.name().to_string(),
                    finish_reason: Some("stop".to_string()),
                }),
                Err(()) => Err(AppError::Llm(LlmError::ConnectionFailed("stub down".to_string()))),
            }
        }

        async fn embed(&self, _text: &str) -> Result<EmbeddingResponse> {
            Ok(EmbeddingResponse {
                embedding: vec![0.1, 0.2],
                model: self.name().to_string(),
            })
        }

        async fn list_models(&self) -> Result<Vec<String>> {
            Ok(vec![self.name().to_string()])
        }

        async fn is_model_available(&self, _model: &str) -> Result<bool> {
            Ok(true)
        }
    }

    fn router_with(openai: Arc<dyn LlmProvider>, groq: Option<Arc<dyn LlmProvider>>) -> BackendRouter {
        BackendRouter {
            local: None,
            openai: Some(openai),
            groq,
            prefer_local: false,
            cache: None,
        }
    }

    #[tokio::test]
    async fn test_falls_back_on_hard_error() {
        let openai: Arc<dyn LlmProvider> = Arc::new(StubProvider {
            ptype: ProviderType::OpenAI,
            response: Err(()),
        });
        let groq: Arc<dyn LlmProvider> = Arc::new(StubProvider {
            ptype: ProviderType::Groq,
            response: Ok("Paris is the capital of France".to_string()),
        });
        let router = router_with(openai, Some(groq));

        let (response, backend) = router.generate_with_fallback(&[], 512, 0.3).await.unwrap();
        assert_eq!(backend, "groq");
        assert_eq!(response.text, "Paris is the capital of France");
    }

    #[tokio::test]
    async fn test_falls_back_on_error_like_text() {
        let openai: Arc<dyn LlmProvider> = Arc::new(StubProvider {
            ptype: ProviderType::OpenAI,
            response: Ok("I encountered an error while answering".to_string()),
        });
        let groq: Arc<dyn LlmProvider> = Arc::new(StubProvider {
            ptype: ProviderType::Groq,
            response: Ok("The answer is 42".to_string()),
        });
        let router = router_with(openai, Some(groq));

        let (response, backend) = router.generate_with_fallback(&[], 512, 0.3).await.unwrap();
        assert_eq!(backend, "groq");
        assert_eq!(response.text, "The answer is 42");
    }

    #[tokio::test]
    async fn test_all_backends_failing_returns_last_error() {
        let openai: Arc<dyn LlmProvider> = Arc::new(StubProvider {
            ptype: ProviderType::OpenAI,
            response: Err(()),
        });
        let router = router_with(openai, None);

        let err = router.generate_with_fallback(&[], 512, 0.3).await.unwrap_err();
        assert!(matches!(err, AppError::Llm(_)));
    }

    #[tokio::test]
    async fn test_prefer_local_orders_local_first() {
        let config = LlmConfig {
            prefer_local: true,
            max_tokens: 512,
            temperature: 0.3,
            timeout: 60,
            local: LocalLlmConfig {
                enabled: false,
                model_path: None,
                use_gpu: false,
                repetition_penalty: 1.1,
            },
            openai: HostedLlmConfig {
                enabled: true,
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
            cache: crate::cache::LlmCacheConfig {
                enabled: false,
                ..crate::cache::LlmCacheConfig::default()
            },
        };
        let router = BackendRouter::from_config(&config).await;
        assert!(router.local.is_none());
        assert!(router.openai.is_some());
    }
}

//! Error taxonomy for the document QA service

use thiserror::Error;

/// Result type alias used throughout the service
pub type Result<T> = std::result::Result<T, AppError>;

/// Top-level error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("vector store error: {0}")]
    Store(#[from] StoreError),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("file too large: {0}")]
    TooLarge(String),

    #[error("no extractable text in document")]
    NoExtractableText,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("generic error: {0}")]
    Generic(#[from] anyhow::Error),
}

/// Errors from the language-model layer
#[derive(Error, Debug)]
pub enum LlmError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    #[error("model not found: {0}")]
    ModelNotFound(String),

    #[error("generation failed: {0}")]
    GenerationFailed(String),

    #[error("embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("timeout: operation took too long")]
    Timeout,

    #[error("unauthorized: check API credentials")]
    Unauthorized,

    #[error("rate limited")]
    RateLimited,

    #[error("server error: {0}")]
    ServerError(String),

    #[error("all backends failed")]
    AllProvidersFailed,

    #[error("no backend is available")]
    Unavailable,

    #[error("unknown error: {0}")]
    Unknown(String),
}

/// Errors from the vector store
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store not initialized")]
    NotInitialized,

    #[error("invalid embedding dimension: expected {expected}, got {actual}")]
    InvalidDimension { expected: usize, actual: usize },

    #[error("search failed: {0}")]
    SearchFailed(String),

    #[error("storage failed: {0}")]
    StorageFailed(String),

    #[error("index invariant violated: {0}")]
    InvariantViolation(String),
}

impl AppError {
    /// Whether retrying the same operation might succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Llm(LlmError::Timeout)
                | AppError::Llm(LlmError::ConnectionFailed(_))
                | AppError::Llm(LlmError::RateLimited)
                | AppError::Http(_)
        )
    }

    /// Coarse category used for logging and metrics
    pub fn category(&self) -> &'static str {
        match self {
            AppError::Llm(_) => "llm",
            AppError::Store(_) => "store",
            AppError::Validation(_) => "validation",
            AppError::NotFound(_) => "not_found",
            AppError::UnsupportedFormat(_) => "unsupported_format",
            AppError::TooLarge(_) => "too_large",
            AppError::NoExtractableText => "no_extractable_text",
            AppError::Config(_) => "config",
            AppError::Io(_) => "io",
            AppError::Serialization(_) => "serialization",
            AppError::Http(_) => "http",
            AppError::Database(_) => "database",
            AppError::Generic(_) => "generic",
        }
    }
}

//! Multi-backend language model abstraction.
//!
//! Three interchangeable backends sit behind [`provider::LlmProvider`]: an
//! in-process local model ([`local`]), and two OpenAI-compatible hosted
//! backends ([`providers::openai`], [`providers::groq`]). [`manager`] picks an
//! ordered primary/fallback pair from whichever backends are configured and
//! available.

pub mod local;
pub mod manager;
pub mod provider;
pub mod providers;

use serde::{Deserialize, Serialize};

pub use manager::BackendRouter;
pub use provider::LlmProvider;

/// Message role in a conversation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A single message in a conversation passed to a backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// Result of a text generation call
#[derive(Debug, Clone)]
pub struct GenerationResponse {
    pub text: String,
    pub tokens_used: Option<u32>,
    pub model: String,
    pub finish_reason: Option<String>,
}

/// Result of an embedding call
#[derive(Debug, Clone)]
pub struct EmbeddingResponse {
    pub embedding: Vec<f32>,
    pub model: String,
}

/// Substrings that mark a generated answer as error-like even though the
/// backend call itself returned `Ok` — these trigger fallback the same way a
/// transport failure would.
pub const ERROR_LIKE_MARKERS: &[&str] = &["encountered an error", "couldn't generate"];

pub fn is_error_like(text: &str) -> bool {
    let lower = text.to_lowercase();
    ERROR_LIKE_MARKERS.iter().any(|m| lower.contains(m))
}

pub fn system_message(content: impl Into<String>) -> Message {
    Message {
        role: Role::System,
        content: content.into(),
    }
}

pub fn user_message(content: impl Into<String>) -> Message {
    Message {
        role: Role::User,
        content: content.into(),
    }
}

pub fn assistant_message(content: impl Into<String>) -> Message {
    Message {
        role: Role::Assistant,
        content: content.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_creation() {
        let system_msg = system_message("You are a helpful assistant");
        assert_eq!(system_msg.role, Role::System);

        let user_msg = user_message("Hello");
        assert_eq!(user_msg.role, Role::User);

        let assistant_msg = assistant_message("Hi there!");
        assert_eq!(assistant_msg.role, Role::Assistant);
    }

    #[test]
    fn test_error_like_detection() {
        assert!(is_error_like("I encountered an error while answering"));
        assert!(is_error_like("Sorry, I couldn't generate a response"));
        assert!(!is_error_like("Paris is the capital of France"));
    }
}

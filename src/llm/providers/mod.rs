//! OpenAI-compatible hosted backend implementations.

pub mod base;
pub mod groq;
pub mod openai;
pub mod openai_compatible;

pub use base::{HttpProviderClient, OpenAICompatible};
pub use groq::GroqProvider;
pub use openai::OpenAIProvider;

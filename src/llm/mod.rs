//! Language-model collaborator
//!
//! A stateless prompt -> text completion call, used both for command
//! classification and for answering open questions.

mod gemini;

use async_trait::async_trait;

pub use gemini::{GeminiClient, GeminiConfig};

/// Errors from a completion call
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("no API key configured for the language model")]
    MissingApiKey,

    #[error("language model request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("language model returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("language model returned no text")]
    EmptyResponse,
}

/// Prompt -> text completion
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;
}

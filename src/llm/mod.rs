//! Inference collaborator: prompt in, text out.
//!
//! Everything that talks to a language model goes through the
//! [`LanguageModel`] trait so the router and sub-agents can be driven by
//! the HTTP client in production and by a scripted model in tests.

pub mod client;
#[cfg(test)]
pub mod testing;

pub use client::{ChatClient, ClientConfig};

use crate::error::LlmError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Message in a chat-completions request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Send one prompt and return the model's text reply.
    async fn complete(&self, prompt: &str) -> Result<String, LlmError>;

    /// Like [`complete`](Self::complete), but generation halts at any of the
    /// given stop sequences. Models without stop support ignore them.
    async fn complete_with_stop(&self, prompt: &str, _stop: &[String]) -> Result<String, LlmError> {
        self.complete(prompt).await
    }

    /// Identifier shown in logs.
    fn model_name(&self) -> &str;
}

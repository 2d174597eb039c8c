//! Text-generation capability.
//!
//! The chat layer treats the generative model as an opaque completion
//! endpoint: an ordered list of role-tagged messages in, one reply out.
//! HTTP providers live in the `repo-chat` app crate.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::Role;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PromptMessage {
    pub role: Role,
    pub content: String,
}

impl PromptMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// One completion request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    /// System message first, then history, then the user turn.
    pub messages: Vec<PromptMessage>,
    pub temperature: Option<f32>,
}

#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;

    /// Produce the assistant reply for `request`.
    ///
    /// Retries and timeouts are the implementation's concern; a returned
    /// error means the turn failed.
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;
}

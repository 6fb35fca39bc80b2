use async_trait::async_trait;

use crate::errors::MarksmanResult;
use crate::llm::types::{CallConfig, ChatMessage, LlmResponse};

/// Chat-completion backend.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Send `messages` and return the accumulated reply, streamed or not
    /// according to `cfg.stream`.
    async fn chat(&self, messages: Vec<ChatMessage>, cfg: &CallConfig) -> MarksmanResult<LlmResponse>;
}

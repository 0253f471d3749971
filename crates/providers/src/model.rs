//! Provider contract.

use std::pin::Pin;

use {async_trait::async_trait, tokio_stream::Stream};

use crate::{
    chunks::{ParsedToolCall, TokenUsage, UnifiedStreamChunk},
    error::ProviderError,
    messages::ChatMessage,
};

/// One completion request, provider-agnostic.
#[derive(Debug, Clone)]
pub struct CompletionRequest {
    pub model_id: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<serde_json::Value>,
    pub tool_choice: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    pub fn new(model_id: impl Into<String>, messages: Vec<ChatMessage>) -> Self {
        Self {
            model_id: model_id.into(),
            messages,
            tools: Vec::new(),
            tool_choice: None,
            temperature: None,
            max_tokens: None,
        }
    }

    /// Total prompt characters, used by the usage estimator.
    pub fn prompt_chars(&self) -> usize {
        self.messages
            .iter()
            .map(|m| match m {
                ChatMessage::System { content } | ChatMessage::User { content } => content.len(),
                ChatMessage::Assistant { content, .. } => {
                    content.as_deref().map(str::len).unwrap_or(0)
                },
                ChatMessage::Tool { content, .. } => content.len(),
            })
            .sum()
    }
}

/// Non-streaming structured reply.
#[derive(Debug, Clone)]
pub struct CompletionResponse {
    pub text: Option<String>,
    pub tool_calls: Vec<ParsedToolCall>,
    pub usage: TokenUsage,
}

/// A lazy, finite, non-restartable sequence of unified chunks.
pub type ChunkStream =
    Pin<Box<dyn Stream<Item = Result<UnifiedStreamChunk, ProviderError>> + Send>>;

/// LLM provider trait. Implementations are opaque streaming endpoints;
/// everything vendor-specific stays behind this boundary.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Model identifier served by this provider instance.
    fn id(&self) -> &str;

    /// Whether this provider supports tool/function calling.
    fn supports_tools(&self) -> bool {
        false
    }

    async fn complete(
        &self,
        request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError>;

    /// Stream a completion as unified chunks. Callers may rely on the §4.4
    /// ordering guarantees; wrap with
    /// [`crate::usage::ensure_final_usage`] to guarantee the trailing
    /// usage chunk.
    fn stream_chunks(&self, request: CompletionRequest) -> ChunkStream;
}

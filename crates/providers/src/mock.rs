//! Scripted provider for tests and offline development.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::{
    chunks::{TokenUsage, UnifiedStreamChunk},
    error::ProviderError,
    model::{ChatProvider, ChunkStream, CompletionRequest, CompletionResponse},
};

/// One scripted provider turn: the chunks to stream, or an error to fail
/// the stream with after the given chunks.
pub struct ScriptedTurn {
    pub chunks: Vec<UnifiedStreamChunk>,
    pub error: Option<ProviderError>,
}

impl ScriptedTurn {
    pub fn text(content: &str) -> Self {
        Self {
            chunks: vec![
                UnifiedStreamChunk::Text {
                    content: content.to_string(),
                },
                UnifiedStreamChunk::Usage(TokenUsage {
                    prompt_tokens: 10,
                    completion_tokens: 5,
                    total_tokens: 15,
                    user_input_tokens: None,
                    system_prompt_tokens: None,
                }),
            ],
            error: None,
        }
    }
}

/// Provider that replays pre-scripted turns in order. Each stream call
/// consumes the next turn; running out of script yields an empty stream
/// with a usage chunk.
pub struct ScriptedProvider {
    model: String,
    turns: Mutex<Vec<ScriptedTurn>>,
}

impl ScriptedProvider {
    pub fn new(model: impl Into<String>, turns: Vec<ScriptedTurn>) -> Self {
        Self {
            model: model.into(),
            turns: Mutex::new(turns),
        }
    }

    fn next_turn(&self) -> ScriptedTurn {
        let mut turns = self.turns.lock().unwrap_or_else(|e| e.into_inner());
        if turns.is_empty() {
            ScriptedTurn::text("")
        } else {
            turns.remove(0)
        }
    }
}

#[async_trait]
impl ChatProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    fn id(&self) -> &str {
        &self.model
    }

    fn supports_tools(&self) -> bool {
        true
    }

    async fn complete(
        &self,
        _request: &CompletionRequest,
    ) -> Result<CompletionResponse, ProviderError> {
        let turn = self.next_turn();
        if let Some(error) = turn.error {
            return Err(error);
        }
        let mut text = String::new();
        let mut tool_calls = Vec::new();
        let mut usage = TokenUsage::default();
        for chunk in turn.chunks {
            match chunk {
                UnifiedStreamChunk::Text { content } => text.push_str(&content),
                UnifiedStreamChunk::ToolCall(call) => tool_calls.push(call),
                UnifiedStreamChunk::Usage(u) => usage = u,
                _ => {},
            }
        }
        Ok(CompletionResponse {
            text: (!text.is_empty()).then_some(text),
            tool_calls,
            usage,
        })
    }

    fn stream_chunks(&self, _request: CompletionRequest) -> ChunkStream {
        let turn = self.next_turn();
        let mut items: Vec<Result<UnifiedStreamChunk, ProviderError>> =
            turn.chunks.into_iter().map(Ok).collect();
        if let Some(error) = turn.error {
            items.push(Err(error));
        }
        Box::pin(tokio_stream::iter(items))
    }
}

//! The unified stream chunk sum type.

use serde::{Deserialize, Serialize};

/// A parsed function-invocation request from the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedToolCall {
    pub tool_call_id: String,
    pub name: String,
    /// Arguments parsed to JSON; falls back to `Null` when the raw text
    /// does not parse.
    pub arguments_parsed: serde_json::Value,
    /// Raw argument text exactly as streamed.
    pub arguments_raw: String,
    /// Opaque provider continuation token, base64. Thinking-capable
    /// providers require it back (as raw bytes) on the next turn or they
    /// reject multi-turn tool use.
    #[serde(default)]
    pub thought_signature: Option<String>,
}

/// Token accounting for one turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    #[serde(default)]
    pub user_input_tokens: Option<u64>,
    #[serde(default)]
    pub system_prompt_tokens: Option<u64>,
}

/// Provider-agnostic stream chunk.
///
/// Ordering within one turn: interleaved `Thinking`/`ThinkingSignature`
/// first, then either `Text` to completion or one-or-more `ToolCall`s
/// (never both interleaved), then exactly one `Usage`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UnifiedStreamChunk {
    /// Fragment of the final user-visible answer.
    Text { content: String },
    /// Fragment of the model's reasoning, shown collapsed.
    Thinking { content: String },
    /// Opaque continuation token for the next turn.
    ThinkingSignature { signature: String },
    /// A function invocation request.
    ToolCall(ParsedToolCall),
    /// Provider-side redacted thinking block.
    ThinkingRedacted,
    /// Accounting; exactly one per successful turn.
    Usage(TokenUsage),
}

impl UnifiedStreamChunk {
    pub fn is_usage(&self) -> bool {
        matches!(self, Self::Usage(_))
    }

    pub fn is_tool_call(&self) -> bool {
        matches!(self, Self::ToolCall(_))
    }
}

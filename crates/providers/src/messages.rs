//! OpenAI-style chat messages — the lingua franca the rest of the system
//! speaks before per-provider normalisation.

use serde::{Deserialize, Serialize};

use crate::chunks::ParsedToolCall;

/// A tool call recorded on an assistant turn, carried back on the next
/// request so the provider can line up the replies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
    /// Base64 continuation token from a thinking-capable provider.
    #[serde(default)]
    pub thought_signature: Option<String>,
}

impl From<ParsedToolCall> for AssistantToolCall {
    fn from(call: ParsedToolCall) -> Self {
        Self {
            id: call.tool_call_id,
            name: call.name,
            arguments: call.arguments_parsed,
            thought_signature: call.thought_signature,
        }
    }
}

/// One message in OpenAI-style history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum ChatMessage {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        tool_calls: Vec<AssistantToolCall>,
    },
    Tool {
        tool_call_id: String,
        name: String,
        content: String,
    },
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::System {
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::User {
            content: content.into(),
        }
    }

    pub fn assistant_text(content: impl Into<String>) -> Self {
        Self::Assistant {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Self::System { .. } => "system",
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
            Self::Tool { .. } => "tool",
        }
    }
}

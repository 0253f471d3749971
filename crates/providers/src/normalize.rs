//! Per-provider message normalisation.
//!
//! Providers that take a `model` role with function-call parts (and a
//! top-level system instruction) get their history rebuilt here:
//!
//! - `system` messages are extracted and joined into one instruction.
//! - assistant turns with tool calls become `model` turns with
//!   function-call parts, thought signatures restored as raw bytes.
//! - consecutive `tool` results are aggregated into a single `user` turn
//!   with N parallel function-response parts. The provider enforces strict
//!   equality between N and the previous turn's function calls; violating
//!   it produces opaque validation errors, so we check it here first.

use base64::Engine;

use crate::messages::ChatMessage;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("tool reply count mismatch: {expected} function calls but {got} replies")]
    ToolReplyMismatch { expected: usize, got: usize },

    #[error("tool reply without a preceding assistant tool call")]
    OrphanToolReply,

    #[error("invalid thought signature (not base64)")]
    BadThoughtSignature,
}

/// One part of a provider-native turn.
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderPart {
    Text(String),
    FunctionCall {
        name: String,
        args: serde_json::Value,
        /// Signature re-materialised as raw bytes for the wire.
        thought_signature: Option<Vec<u8>>,
    },
    FunctionResponse {
        name: String,
        response: serde_json::Value,
    },
}

/// A provider-native turn: `user` or `model` role plus parts.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderTurn {
    pub role: &'static str,
    pub parts: Vec<ProviderPart>,
}

/// Convert OpenAI-style history into `(system_instruction, turns)`.
pub fn to_provider_turns(
    messages: &[ChatMessage],
) -> Result<(Option<String>, Vec<ProviderTurn>), NormalizeError> {
    let mut system_text: Option<String> = None;
    let mut turns: Vec<ProviderTurn> = Vec::new();
    // Tool-call arity of the most recent model turn, consumed by the
    // aggregation below.
    let mut open_call_names: Vec<String> = Vec::new();
    let mut pending_responses: Vec<ProviderPart> = Vec::new();

    let flush_responses = |turns: &mut Vec<ProviderTurn>,
                               open_call_names: &mut Vec<String>,
                               pending: &mut Vec<ProviderPart>|
     -> Result<(), NormalizeError> {
        if pending.is_empty() {
            return Ok(());
        }
        if pending.len() != open_call_names.len() {
            return Err(NormalizeError::ToolReplyMismatch {
                expected: open_call_names.len(),
                got: pending.len(),
            });
        }
        turns.push(ProviderTurn {
            role: "user",
            parts: std::mem::take(pending),
        });
        open_call_names.clear();
        Ok(())
    };

    for message in messages {
        match message {
            ChatMessage::System { content } => {
                flush_responses(&mut turns, &mut open_call_names, &mut pending_responses)?;
                system_text = Some(match system_text {
                    Some(existing) => format!("{existing}\n\n{content}"),
                    None => content.clone(),
                });
            },
            ChatMessage::User { content } => {
                flush_responses(&mut turns, &mut open_call_names, &mut pending_responses)?;
                turns.push(ProviderTurn {
                    role: "user",
                    parts: vec![ProviderPart::Text(content.clone())],
                });
            },
            ChatMessage::Assistant {
                content,
                tool_calls,
            } => {
                flush_responses(&mut turns, &mut open_call_names, &mut pending_responses)?;
                let mut parts = Vec::new();
                if let Some(text) = content
                    && !text.is_empty()
                {
                    parts.push(ProviderPart::Text(text.clone()));
                }
                for call in tool_calls {
                    let thought_signature = call
                        .thought_signature
                        .as_deref()
                        .map(|sig| {
                            base64::engine::general_purpose::STANDARD
                                .decode(sig)
                                .map_err(|_| NormalizeError::BadThoughtSignature)
                        })
                        .transpose()?;
                    parts.push(ProviderPart::FunctionCall {
                        name: call.name.clone(),
                        args: call.arguments.clone(),
                        thought_signature,
                    });
                    open_call_names.push(call.name.clone());
                }
                turns.push(ProviderTurn {
                    role: "model",
                    parts,
                });
            },
            ChatMessage::Tool { name, content, .. } => {
                if open_call_names.is_empty() {
                    return Err(NormalizeError::OrphanToolReply);
                }
                let response = serde_json::from_str(content)
                    .unwrap_or_else(|_| serde_json::json!({ "result": content }));
                pending_responses.push(ProviderPart::FunctionResponse {
                    name: name.clone(),
                    response,
                });
            },
        }
    }
    flush_responses(&mut turns, &mut open_call_names, &mut pending_responses)?;

    Ok((system_text, turns))
}

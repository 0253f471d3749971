//! Provider streaming adapter.
//!
//! Heterogeneous LLM provider streams are normalised into one sum type,
//! [`UnifiedStreamChunk`], so everything downstream matches on a tag
//! instead of on vendor payloads. Providers are opaque streaming
//! endpoints behind the [`ChatProvider`] trait.

pub mod chunks;
pub mod error;
pub mod messages;
pub mod mock;
pub mod model;
pub mod normalize;
pub mod openai_compat;
pub mod registry;
pub mod usage;

pub use {
    chunks::{ParsedToolCall, TokenUsage, UnifiedStreamChunk},
    error::ProviderError,
    messages::{AssistantToolCall, ChatMessage},
    mock::{ScriptedProvider, ScriptedTurn},
    model::{ChatProvider, ChunkStream, CompletionRequest, CompletionResponse},
    normalize::{NormalizeError, ProviderPart, ProviderTurn, to_provider_turns},
    openai_compat::OpenAiCompatProvider,
    registry::{ModelInfo, ProviderRegistry},
    usage::{coalesce_usage, ensure_final_usage, estimate_tokens},
};

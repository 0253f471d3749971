//! Usage normalisation.
//!
//! Exactly one usage chunk is owed per successful stream. Providers that
//! omit it get an estimate appended; errored streams get nothing. Missing
//! provider-side counters coalesce to zero instead of poking at optional
//! fields downstream.

use async_stream::stream;
use futures::StreamExt;

use crate::{
    chunks::{TokenUsage, UnifiedStreamChunk},
    model::ChunkStream,
};

/// Rough chars-per-token ratio used when the provider omits usage.
const CHARS_PER_TOKEN: usize = 4;

/// Estimate a token count from text length. Runs on the blocking pool:
/// real tokenizers are CPU-bound and this is their seam.
pub async fn estimate_tokens(chars: usize) -> u64 {
    tokio::task::spawn_blocking(move || (chars / CHARS_PER_TOKEN).max(1) as u64)
        .await
        .unwrap_or(1)
}

/// Build a usage record from possibly-missing provider counters.
pub fn coalesce_usage(
    prompt_tokens: Option<u64>,
    completion_tokens: Option<u64>,
    total_tokens: Option<u64>,
) -> TokenUsage {
    let prompt = prompt_tokens.unwrap_or(0);
    let completion = completion_tokens.unwrap_or(0);
    TokenUsage {
        prompt_tokens: prompt,
        completion_tokens: completion,
        total_tokens: total_tokens.unwrap_or(prompt + completion),
        user_input_tokens: None,
        system_prompt_tokens: None,
    }
}

/// Wrap a provider stream so that a successfully completed stream always
/// ends with exactly one usage chunk. If the provider already emitted one
/// it passes through untouched; if the stream errored, no estimate is
/// produced.
pub fn ensure_final_usage(inner: ChunkStream, prompt_chars: usize) -> ChunkStream {
    Box::pin(stream! {
        let mut inner = inner;
        let mut saw_usage = false;
        let mut errored = false;
        let mut output_chars = 0usize;

        while let Some(item) = inner.next().await {
            match &item {
                Ok(UnifiedStreamChunk::Usage(_)) => saw_usage = true,
                Ok(UnifiedStreamChunk::Text { content })
                | Ok(UnifiedStreamChunk::Thinking { content }) => {
                    output_chars += content.len();
                },
                Ok(_) => {},
                Err(_) => errored = true,
            }
            yield item;
        }

        if !saw_usage && !errored {
            let prompt_tokens = estimate_tokens(prompt_chars).await;
            let completion_tokens = estimate_tokens(output_chars).await;
            yield Ok(UnifiedStreamChunk::Usage(TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
                user_input_tokens: None,
                system_prompt_tokens: None,
            }));
        }
    })
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;

    fn chunk_stream(items: Vec<Result<UnifiedStreamChunk, ProviderError>>) -> ChunkStream {
        Box::pin(tokio_stream::iter(items))
    }

    #[tokio::test]
    async fn appends_estimate_when_usage_missing() {
        let inner = chunk_stream(vec![Ok(UnifiedStreamChunk::Text {
            content: "x".repeat(40),
        })]);
        let chunks: Vec<_> = ensure_final_usage(inner, 80).collect().await;

        assert_eq!(chunks.len(), 2);
        let Ok(UnifiedStreamChunk::Usage(usage)) = &chunks[1] else {
            panic!("expected trailing usage chunk");
        };
        assert_eq!(usage.prompt_tokens, 20);
        assert_eq!(usage.completion_tokens, 10);
    }

    #[tokio::test]
    async fn passes_provider_usage_through() {
        let inner = chunk_stream(vec![
            Ok(UnifiedStreamChunk::Text { content: "hi".into() }),
            Ok(UnifiedStreamChunk::Usage(coalesce_usage(Some(5), Some(7), None))),
        ]);
        let chunks: Vec<_> = ensure_final_usage(inner, 1000).collect().await;

        let usage_chunks: Vec<_> = chunks
            .iter()
            .filter(|c| matches!(c, Ok(chunk) if chunk.is_usage()))
            .collect();
        assert_eq!(usage_chunks.len(), 1);
    }

    #[tokio::test]
    async fn no_estimate_after_error() {
        let inner = chunk_stream(vec![
            Ok(UnifiedStreamChunk::Text { content: "hi".into() }),
            Err(ProviderError::Transient("boom".into())),
        ]);
        let chunks: Vec<_> = ensure_final_usage(inner, 100).collect().await;

        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| !matches!(c, Ok(chunk) if chunk.is_usage())));
    }

    #[test]
    fn coalesce_defaults_missing_fields_to_zero() {
        let usage = coalesce_usage(None, Some(9), None);
        assert_eq!(usage.prompt_tokens, 0);
        assert_eq!(usage.completion_tokens, 9);
        assert_eq!(usage.total_tokens, 9);
    }
}

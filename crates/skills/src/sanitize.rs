//! Content sanitization boundary.
//!
//! Externally fetched text (web pages, transcripts, documents) passes
//! through a sanitizer before it reaches the LLM. A blocked or failed
//! result yields a skill-level error for that element only; sibling
//! elements proceed.

use async_trait::async_trait;

/// Outcome of sanitizing one piece of fetched content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sanitized {
    Clean(String),
    /// Sanitizer refused the content.
    Blocked,
    /// Sanitizer produced nothing usable.
    Failed,
}

#[async_trait]
pub trait Sanitizer: Send + Sync {
    async fn sanitize(&self, text: &str) -> Sanitized;
}

/// Pass-through sanitizer that only rejects empty input. Used where the
/// external sanitization service is not wired up.
pub struct PassthroughSanitizer;

#[async_trait]
impl Sanitizer for PassthroughSanitizer {
    async fn sanitize(&self, text: &str) -> Sanitized {
        if text.trim().is_empty() {
            Sanitized::Failed
        } else {
            Sanitized::Clean(text.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passthrough_rejects_empty_content() {
        let sanitizer = PassthroughSanitizer;
        assert_eq!(sanitizer.sanitize("  ").await, Sanitized::Failed);
        assert_eq!(
            sanitizer.sanitize("hello").await,
            Sanitized::Clean("hello".into())
        );
    }
}

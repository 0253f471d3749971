//! AI-generation detection for uploaded images.
//!
//! Best-effort and non-blocking: detector failures return `None` and the
//! upload proceeds. Only the verdict (if any) travels with the response.

use {async_trait::async_trait, serde::Serialize, tracing::debug};

/// Detector verdict as forwarded to the client.
#[derive(Debug, Clone, Serialize)]
pub struct AiDetection {
    pub ai_generated_score: f64,
}

#[async_trait]
pub trait AiDetector: Send + Sync {
    /// `None` means "no verdict" — detector down, timeout, or
    /// unsupported input.
    async fn detect(&self, bytes: &[u8]) -> Option<AiDetection>;
}

/// Stand-in used when no external detector is configured.
pub struct NoopDetector;

#[async_trait]
impl AiDetector for NoopDetector {
    async fn detect(&self, bytes: &[u8]) -> Option<AiDetection> {
        debug!(size = bytes.len(), "ai-generation detector not configured");
        None
    }
}

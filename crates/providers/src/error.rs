//! Provider error kinds, by domain.

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Provider asked us to come back later. The wait time is opaque
    /// seconds; the task layer re-enqueues after it.
    #[error("rate limited, retry in {wait_time_seconds}s")]
    RateLimited { wait_time_seconds: u64 },

    /// Timeouts, 5xx — worth retrying against a secondary model.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// 400 bad schema and friends — retrying cannot help.
    #[error("permanent provider error: {0}")]
    Permanent(String),

    /// 404 on the model id — a configuration error, not a provider fault.
    #[error("model not found: {0}")]
    ModelNotFound(String),

    /// Transport failures propagate wrapped; the runner may retry
    /// against a secondary model.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("malformed provider payload: {0}")]
    MalformedPayload(String),
}

impl ProviderError {
    /// Whether the runner should try the next model in the chain.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Transport(_))
    }
}

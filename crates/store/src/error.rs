use veil_common::FromMessage;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0}")]
    Message(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("ownership mismatch for chat {0}")]
    OwnershipMismatch(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FromMessage for StoreError {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Error = StoreError;
pub type Result<T> = std::result::Result<T, StoreError>;

veil_common::impl_context!();

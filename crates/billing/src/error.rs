use veil_common::FromMessage;

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("{0}")]
    Message(String),

    #[error("insufficient credits: needed {needed}, available {available}")]
    InsufficientCredits { needed: i64, available: i64 },

    #[error("invalid year-month: {0}")]
    InvalidYearMonth(String),

    #[error("archive not found for {user_id_hash}/{year_month}")]
    ArchiveNotFound {
        user_id_hash: String,
        year_month: String,
    },

    #[error(transparent)]
    Store(#[from] veil_store::StoreError),

    #[error(transparent)]
    Blob(#[from] veil_blob::BlobError),

    #[error(transparent)]
    Vault(#[from] veil_vault::VaultError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FromMessage for BillingError {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Error = BillingError;
pub type Result<T> = std::result::Result<T, BillingError>;

veil_common::impl_context!();

use veil_common::FromMessage;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("{0}")]
    Message(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Store(#[from] veil_store::StoreError),

    #[error(transparent)]
    Vault(#[from] veil_vault::VaultError),

    #[error(transparent)]
    Blob(#[from] veil_blob::BlobError),

    #[error(transparent)]
    Billing(#[from] veil_billing::BillingError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FromMessage for GatewayError {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Error = GatewayError;
pub type Result<T> = std::result::Result<T, GatewayError>;

veil_common::impl_context!();

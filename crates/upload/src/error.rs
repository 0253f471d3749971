use veil_common::FromMessage;

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("{0}")]
    Message(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("file too large: {size} bytes (limit {limit})")]
    TooLarge { size: u64, limit: u64 },

    #[error("unsupported media type: {0}")]
    UnsupportedType(String),

    #[error("malware detected: {0}")]
    MalwareDetected(String),

    #[error("pdf has {pages} pages (limit {limit})")]
    TooManyPages { pages: usize, limit: usize },

    #[error("insufficient credits")]
    InsufficientCredits,

    #[error("image processing failed: {0}")]
    ImageProcessing(String),

    #[error("core api error: {0}")]
    CoreApi(String),

    #[error(transparent)]
    Blob(#[from] veil_blob::BlobError),

    #[error(transparent)]
    Vault(#[from] veil_vault::VaultError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl FromMessage for UploadError {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

impl UploadError {
    /// HTTP status for this failure.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Unauthorized => 401,
            Self::InsufficientCredits => 402,
            Self::TooLarge { .. } => 413,
            Self::UnsupportedType(_) => 415,
            Self::MalwareDetected(_) | Self::TooManyPages { .. } => 422,
            _ => 500,
        }
    }
}

pub type Error = UploadError;
pub type Result<T> = std::result::Result<T, UploadError>;

veil_common::impl_context!();

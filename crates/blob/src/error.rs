#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("invalid object key: {0}")]
    InvalidKey(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

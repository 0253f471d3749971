use veil_common::FromMessage;

#[derive(Debug, thiserror::Error)]
pub enum SkillError {
    #[error("{0}")]
    Message(String),

    #[error("unknown skill: {0}")]
    UnknownSkill(String),

    #[error("invalid request body: {0}")]
    InvalidRequest(String),

    #[error("content blocked by sanitization")]
    IntegrityBlocked,

    #[error("skill execution cancelled")]
    Cancelled,

    #[error("manifest error: {0}")]
    Manifest(#[from] serde_yaml::Error),
}

impl FromMessage for SkillError {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Error = SkillError;
pub type Result<T> = std::result::Result<T, SkillError>;

veil_common::impl_context!();

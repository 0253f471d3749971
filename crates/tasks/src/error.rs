use veil_common::FromMessage;

#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("{0}")]
    Message(String),

    #[error("no provider available for any model in the chain")]
    NoProvider,

    #[error(transparent)]
    Store(#[from] veil_store::StoreError),

    #[error(transparent)]
    Vault(#[from] veil_vault::VaultError),

    #[error(transparent)]
    Provider(#[from] veil_providers::ProviderError),

    #[error(transparent)]
    Skill(#[from] veil_skills::SkillError),

    #[error(transparent)]
    Billing(#[from] veil_billing::BillingError),
}

impl FromMessage for TaskError {
    fn from_message(message: String) -> Self {
        Self::Message(message)
    }
}

pub type Error = TaskError;
pub type Result<T> = std::result::Result<T, TaskError>;

veil_common::impl_context!();

//! Chat ownership checks.
//!
//! Consulted before every state-mutating operation. Cache first, durable
//! fallback. A chat that exists nowhere is a new/local chat: the first
//! write is what binds the owner, so the operation is permitted.

use std::sync::Arc;

use tracing::debug;

use crate::{Result, cache::CacheTier, durable::DurableStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnershipStatus {
    /// The chat exists and belongs to this user.
    Owned,
    /// No record anywhere — first-use, permitted.
    NewChat,
    /// The chat exists and belongs to someone else.
    Mismatch,
}

impl OwnershipStatus {
    pub fn is_permitted(self) -> bool {
        !matches!(self, Self::Mismatch)
    }
}

/// Verify `hashed_user_id` against the stored owner of `chat_id`.
///
/// Infrastructure failures on the durable fallback fail closed (the error
/// propagates) — except that a pure cache hit never touches the durable
/// tier at all.
pub async fn check_chat_ownership(
    cache: &CacheTier,
    durable: &Arc<dyn DurableStore>,
    hashed_user_id: &str,
    chat_id: &str,
) -> Result<OwnershipStatus> {
    if let Some(chat) = cache.get_chat(chat_id).await {
        return Ok(if chat.hashed_user_id == hashed_user_id {
            OwnershipStatus::Owned
        } else {
            OwnershipStatus::Mismatch
        });
    }

    match durable.get_chat(chat_id).await? {
        Some(chat) if chat.hashed_user_id == hashed_user_id => Ok(OwnershipStatus::Owned),
        Some(_) => Ok(OwnershipStatus::Mismatch),
        None => {
            debug!(chat_id, "chat unknown to both tiers, treating as new");
            Ok(OwnershipStatus::NewChat)
        },
    }
}

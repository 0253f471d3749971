//! "Load more chats" pager.
//!
//! The client receives its first ~100 chats through bulk sync; older chats
//! come through here with `(offset, limit)` against the sorted index.
//! Responses are metadata-only wrappers — messages load on demand when the
//! user opens a chat.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Result, cache::CacheTier, durable::DurableStore, types::ChatRecord};

/// Hard cap on the page size, mirrored by the wire contract.
pub const MAX_PAGE_LIMIT: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatPage {
    pub chats: Vec<ChatRecord>,
    pub has_more: bool,
    pub total_count: usize,
    pub offset: usize,
}

/// Page through a user's chats, newest-edited first.
///
/// The cache index answers when it has the user at all; otherwise the
/// durable tier serves the same `(offset, limit)` window.
pub async fn load_more_chats(
    cache: &CacheTier,
    durable: &Arc<dyn DurableStore>,
    hashed_user_id: &str,
    offset: usize,
    limit: usize,
) -> Result<ChatPage> {
    let limit = limit.min(MAX_PAGE_LIMIT);

    let cached_total = cache.chat_count(hashed_user_id).await;
    if cached_total > 0 {
        let slice = cache
            .get_chat_ids_versions(hashed_user_id, offset, offset + limit)
            .await;
        let mut chats = Vec::with_capacity(slice.len());
        for (chat_id, _) in slice {
            if let Some(chat) = cache.get_chat_list_item_data(&chat_id).await {
                chats.push(chat);
            }
        }
        let has_more = offset + chats.len() < cached_total;
        return Ok(ChatPage {
            chats,
            has_more,
            total_count: cached_total,
            offset,
        });
    }

    debug!(hashed_user_id, offset, limit, "chat pager falling back to durable store");
    let total_count = durable.count_chats(hashed_user_id).await?;
    let chats = durable.list_chats(hashed_user_id, offset, limit).await?;
    let has_more = offset + chats.len() < total_count;
    Ok(ChatPage {
        chats,
        has_more,
        total_count,
        offset,
    })
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        durable_memory::MemoryStore,
        types::{ChatRecord, ChatVersions},
    };

    fn chat(chat_id: &str, owner: &str, edited: i64) -> ChatRecord {
        ChatRecord {
            chat_id: chat_id.into(),
            hashed_user_id: owner.into(),
            encrypted_title: Some(format!("enc:{chat_id}")),
            encrypted_chat_key: None,
            encrypted_active_focus_id: None,
            encrypted_category: None,
            encrypted_summary: None,
            encrypted_tag_list: None,
            last_message_timestamp: edited,
            last_edited_overall_timestamp: edited,
            pinned: false,
            is_shared: false,
            is_private: false,
            versions: ChatVersions::default(),
        }
    }

    #[tokio::test]
    async fn pages_from_cache_newest_first() {
        let cache = CacheTier::new();
        let durable: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
        for i in 0..5 {
            cache.upsert_chat(chat(&format!("c{i}"), "u", i)).await;
        }

        let page = load_more_chats(&cache, &durable, "u", 0, 2).await.unwrap();
        assert_eq!(page.total_count, 5);
        assert!(page.has_more);
        assert_eq!(page.chats[0].chat_id, "c4");
        assert_eq!(page.chats[1].chat_id, "c3");

        let last = load_more_chats(&cache, &durable, "u", 4, 2).await.unwrap();
        assert_eq!(last.chats.len(), 1);
        assert!(!last.has_more);
    }

    #[tokio::test]
    async fn offset_at_total_returns_empty_no_more() {
        let cache = CacheTier::new();
        let durable: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
        for i in 0..3 {
            cache.upsert_chat(chat(&format!("c{i}"), "u", i)).await;
        }

        let page = load_more_chats(&cache, &durable, "u", 3, 20).await.unwrap();
        assert!(page.chats.is_empty());
        assert!(!page.has_more);
        assert_eq!(page.total_count, 3);
    }

    #[tokio::test]
    async fn falls_back_to_durable_on_cache_miss() {
        let cache = CacheTier::new();
        let store = MemoryStore::new();
        for i in 0..3 {
            store.upsert_chat(&chat(&format!("c{i}"), "u", i)).await.unwrap();
        }
        let durable: Arc<dyn DurableStore> = Arc::new(store);

        let page = load_more_chats(&cache, &durable, "u", 1, 2).await.unwrap();
        assert_eq!(page.total_count, 3);
        assert_eq!(page.chats.len(), 2);
        assert_eq!(page.chats[0].chat_id, "c1");
        assert!(!page.has_more);
    }

    #[tokio::test]
    async fn limit_is_clamped() {
        let cache = CacheTier::new();
        let durable: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
        for i in 0..60 {
            cache.upsert_chat(chat(&format!("c{i}"), "u", i)).await;
        }

        let page = load_more_chats(&cache, &durable, "u", 0, 500).await.unwrap();
        assert_eq!(page.chats.len(), MAX_PAGE_LIMIT);
        assert!(page.has_more);
    }
}

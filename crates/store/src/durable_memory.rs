//! In-memory durable store, used in tests and single-process development.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    Result,
    durable::{ChatSuggestion, DurableStore},
    types::{
        ChatRecord, EmbedKeyWrapper, EmbedRecord, MessageRecord, MonthlySummary, SummaryKind,
        UsageEntry, UserProfile,
    },
};

#[derive(Default)]
struct MemoryInner {
    chats: HashMap<String, ChatRecord>,
    messages: Vec<MessageRecord>,
    embeds: HashMap<String, EmbedRecord>,
    embed_keys: Vec<EmbedKeyWrapper>,
    usage: Vec<UsageEntry>,
    summaries: HashMap<String, MonthlySummary>,
    profiles: HashMap<String, UserProfile>,
    suggestions: Vec<ChatSuggestion>,
}

/// In-memory implementation of [`DurableStore`].
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableStore for MemoryStore {
    async fn upsert_chat(&self, chat: &ChatRecord) -> Result<()> {
        self.inner
            .write()
            .await
            .chats
            .insert(chat.chat_id.clone(), chat.clone());
        Ok(())
    }

    async fn get_chat(&self, chat_id: &str) -> Result<Option<ChatRecord>> {
        Ok(self.inner.read().await.chats.get(chat_id).cloned())
    }

    async fn delete_chat(&self, chat_id: &str) -> Result<()> {
        self.inner.write().await.chats.remove(chat_id);
        Ok(())
    }

    async fn list_chats(
        &self,
        hashed_user_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ChatRecord>> {
        let inner = self.inner.read().await;
        let mut chats: Vec<ChatRecord> = inner
            .chats
            .values()
            .filter(|c| c.hashed_user_id == hashed_user_id)
            .cloned()
            .collect();
        chats.sort_by_key(|c| std::cmp::Reverse(c.last_edited_overall_timestamp));
        Ok(chats.into_iter().skip(offset).take(limit).collect())
    }

    async fn count_chats(&self, hashed_user_id: &str) -> Result<usize> {
        Ok(self
            .inner
            .read()
            .await
            .chats
            .values()
            .filter(|c| c.hashed_user_id == hashed_user_id)
            .count())
    }

    async fn insert_message(&self, message: &MessageRecord) -> Result<()> {
        self.inner.write().await.messages.push(message.clone());
        Ok(())
    }

    async fn get_messages(&self, hashed_chat_id: &str) -> Result<Vec<MessageRecord>> {
        let inner = self.inner.read().await;
        let mut messages: Vec<MessageRecord> = inner
            .messages
            .iter()
            .filter(|m| m.hashed_chat_id == hashed_chat_id)
            .cloned()
            .collect();
        messages.sort_by_key(|m| std::cmp::Reverse(m.created_at));
        Ok(messages)
    }

    async fn delete_message(&self, hashed_chat_id: &str, hashed_message_id: &str) -> Result<()> {
        self.inner.write().await.messages.retain(|m| {
            !(m.hashed_chat_id == hashed_chat_id && m.hashed_message_id == hashed_message_id)
        });
        Ok(())
    }

    async fn upsert_embed(&self, embed: &EmbedRecord) -> Result<()> {
        self.inner
            .write()
            .await
            .embeds
            .insert(embed.embed_id.clone(), embed.clone());
        Ok(())
    }

    async fn get_embed(&self, embed_id: &str) -> Result<Option<EmbedRecord>> {
        Ok(self.inner.read().await.embeds.get(embed_id).cloned())
    }

    async fn delete_embed(&self, embed_id: &str) -> Result<()> {
        self.inner.write().await.embeds.remove(embed_id);
        Ok(())
    }

    async fn find_embed_by_content_hash(
        &self,
        hashed_user_id: &str,
        content_hash: &str,
    ) -> Result<Option<EmbedRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .embeds
            .values()
            .find(|e| {
                e.hashed_user_id == hashed_user_id
                    && e.content_hash.as_deref() == Some(content_hash)
            })
            .cloned())
    }

    async fn append_embed_key(&self, wrapper: &EmbedKeyWrapper) -> Result<()> {
        self.inner.write().await.embed_keys.push(wrapper.clone());
        Ok(())
    }

    async fn list_embed_keys(&self, hashed_embed_id: &str) -> Result<Vec<EmbedKeyWrapper>> {
        Ok(self
            .inner
            .read()
            .await
            .embed_keys
            .iter()
            .filter(|k| k.hashed_embed_id == hashed_embed_id)
            .cloned()
            .collect())
    }

    async fn insert_usage_entry(&self, entry: &UsageEntry) -> Result<()> {
        self.inner.write().await.usage.push(entry.clone());
        Ok(())
    }

    async fn usage_entries_in_window(
        &self,
        user_id_hash: &str,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<Vec<UsageEntry>> {
        Ok(self
            .inner
            .read()
            .await
            .usage
            .iter()
            .filter(|e| {
                e.user_id_hash == user_id_hash
                    && e.created_at >= start_ts
                    && e.created_at < end_ts
            })
            .cloned()
            .collect())
    }

    async fn usage_users_in_window(&self, start_ts: i64, end_ts: i64) -> Result<Vec<String>> {
        let inner = self.inner.read().await;
        let mut users: Vec<String> = inner
            .usage
            .iter()
            .filter(|e| e.created_at >= start_ts && e.created_at < end_ts)
            .map(|e| e.user_id_hash.clone())
            .collect();
        users.sort();
        users.dedup();
        Ok(users)
    }

    async fn delete_usage_entry(&self, id: &str) -> Result<()> {
        self.inner.write().await.usage.retain(|e| e.id != id);
        Ok(())
    }

    async fn upsert_summary(&self, summary: &MonthlySummary) -> Result<()> {
        self.inner
            .write()
            .await
            .summaries
            .insert(summary.id.clone(), summary.clone());
        Ok(())
    }

    async fn summaries_for_month(
        &self,
        user_id_hash: &str,
        year_month: &str,
        kind: SummaryKind,
    ) -> Result<Vec<MonthlySummary>> {
        Ok(self
            .inner
            .read()
            .await
            .summaries
            .values()
            .filter(|s| {
                s.user_id_hash == user_id_hash && s.year_month == year_month && s.kind == kind
            })
            .cloned()
            .collect())
    }

    async fn mark_summary_archived(&self, id: &str, archive_s3_key: &str) -> Result<()> {
        if let Some(summary) = self.inner.write().await.summaries.get_mut(id) {
            summary.is_archived = true;
            summary.archive_s3_key = Some(archive_s3_key.to_string());
        }
        Ok(())
    }

    async fn upsert_profile(&self, profile: &UserProfile) -> Result<()> {
        self.inner
            .write()
            .await
            .profiles
            .insert(profile.user_id_hash.clone(), profile.clone());
        Ok(())
    }

    async fn get_profile(&self, user_id_hash: &str) -> Result<Option<UserProfile>> {
        Ok(self.inner.read().await.profiles.get(user_id_hash).cloned())
    }

    async fn insert_chat_suggestion(&self, suggestion: &ChatSuggestion) -> Result<()> {
        self.inner.write().await.suggestions.push(suggestion.clone());
        Ok(())
    }

    async fn delete_chat_suggestion(
        &self,
        hashed_user_id: &str,
        suggestion_id: &str,
    ) -> Result<bool> {
        let mut inner = self.inner.write().await;
        let before = inner.suggestions.len();
        inner.suggestions.retain(|s| {
            !(s.hashed_user_id == hashed_user_id && s.suggestion_id == suggestion_id)
        });
        Ok(before != inner.suggestions.len())
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChatVersions, EmbedStatus, EncryptionMode};

    fn embed(embed_id: &str, content: &str) -> EmbedRecord {
        EmbedRecord {
            hashed_embed_id: format!("h-{embed_id}"),
            embed_id: embed_id.into(),
            encryption_mode: EncryptionMode::Client,
            encrypted_content: content.into(),
            hashed_user_id: "uh".into(),
            hashed_chat_id: None,
            hashed_message_id: None,
            r#type: None,
            share_mode: None,
            parent_embed_id: None,
            child_embed_ids: Vec::new(),
            version_number: None,
            file_path: None,
            content_hash: Some("ch".into()),
            status: EmbedStatus::Finished,
            text_length_chars: None,
            created_at: 1,
            updated_at: 1,
        }
    }

    #[tokio::test]
    async fn embed_upsert_leaves_one_record() {
        let store = MemoryStore::new();
        store.upsert_embed(&embed("e1", "a")).await.unwrap();
        store.upsert_embed(&embed("e1", "b")).await.unwrap();

        let found = store.get_embed("e1").await.unwrap().unwrap();
        assert_eq!(found.encrypted_content, "b");
        assert!(store
            .find_embed_by_content_hash("uh", "ch")
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn usage_window_is_half_open() {
        let store = MemoryStore::new();
        for (id, at) in [("a", 100), ("b", 199), ("c", 200)] {
            store
                .insert_usage_entry(&UsageEntry {
                    id: id.into(),
                    user_id_hash: "uh".into(),
                    app_id: "ai".into(),
                    skill_id: "ask".into(),
                    encrypted_credits_costs_total: String::new(),
                    encrypted_model_used: String::new(),
                    encrypted_input_tokens: String::new(),
                    encrypted_output_tokens: String::new(),
                    created_at: at,
                    chat_id: None,
                    message_id: None,
                    api_key_hash: None,
                })
                .await
                .unwrap();
        }

        let entries = store.usage_entries_in_window("uh", 100, 200).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(store.usage_users_in_window(100, 200).await.unwrap(), vec![
            "uh".to_string()
        ]);
    }

    #[tokio::test]
    async fn suggestion_delete_is_owner_scoped() {
        let store = MemoryStore::new();
        store
            .insert_chat_suggestion(&ChatSuggestion {
                suggestion_id: "s1".into(),
                hashed_user_id: "uh".into(),
                encrypted_suggestion: "ct".into(),
            })
            .await
            .unwrap();

        assert!(!store.delete_chat_suggestion("other", "s1").await.unwrap());
        assert!(store.delete_chat_suggestion("uh", "s1").await.unwrap());
        assert!(!store.delete_chat_suggestion("uh", "s1").await.unwrap());
    }

    #[tokio::test]
    async fn chat_listing_orders_and_pages() {
        let store = MemoryStore::new();
        for (id, edited) in [("c1", 10), ("c2", 30), ("c3", 20)] {
            store
                .upsert_chat(&ChatRecord {
                    chat_id: id.into(),
                    hashed_user_id: "uh".into(),
                    encrypted_title: None,
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
                })
                .await
                .unwrap();
        }

        let page = store.list_chats("uh", 1, 2).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].chat_id, "c3");
        assert_eq!(page[1].chat_id, "c1");
        assert_eq!(store.count_chats("uh").await.unwrap(), 3);
    }
}

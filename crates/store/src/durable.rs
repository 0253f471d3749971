//! Persistence trait for the durable tier.
//!
//! Eventually consistent behind the cache. The external document store is
//! a named capability; this trait is its contract, with in-memory and
//! SQLite implementations in the sibling modules.

use async_trait::async_trait;

use crate::{
    Result,
    types::{
        ChatRecord, EmbedKeyWrapper, EmbedRecord, MessageRecord, MonthlySummary, SummaryKind,
        UsageEntry, UserProfile,
    },
};

/// A sidebar suggestion row for a brand-new chat. Content is ciphertext.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ChatSuggestion {
    pub suggestion_id: String,
    pub hashed_user_id: String,
    pub encrypted_suggestion: String,
}

#[async_trait]
pub trait DurableStore: Send + Sync {
    // ── Chats ────────────────────────────────────────────────────────────
    async fn upsert_chat(&self, chat: &ChatRecord) -> Result<()>;
    async fn get_chat(&self, chat_id: &str) -> Result<Option<ChatRecord>>;
    async fn delete_chat(&self, chat_id: &str) -> Result<()>;
    /// Chats for one user ordered by `last_edited_overall_timestamp`
    /// descending, with `(offset, limit)` pagination.
    async fn list_chats(
        &self,
        hashed_user_id: &str,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<ChatRecord>>;
    async fn count_chats(&self, hashed_user_id: &str) -> Result<usize>;

    // ── Messages ─────────────────────────────────────────────────────────
    async fn insert_message(&self, message: &MessageRecord) -> Result<()>;
    /// Messages for one chat, newest first.
    async fn get_messages(&self, hashed_chat_id: &str) -> Result<Vec<MessageRecord>>;
    async fn delete_message(&self, hashed_chat_id: &str, hashed_message_id: &str) -> Result<()>;

    // ── Embeds ───────────────────────────────────────────────────────────
    async fn upsert_embed(&self, embed: &EmbedRecord) -> Result<()>;
    async fn get_embed(&self, embed_id: &str) -> Result<Option<EmbedRecord>>;
    async fn delete_embed(&self, embed_id: &str) -> Result<()>;
    /// Find an embed by upload content hash (dedup check).
    async fn find_embed_by_content_hash(
        &self,
        hashed_user_id: &str,
        content_hash: &str,
    ) -> Result<Option<EmbedRecord>>;

    // ── Embed key wrappers (append-only) ─────────────────────────────────
    async fn append_embed_key(&self, wrapper: &EmbedKeyWrapper) -> Result<()>;
    async fn list_embed_keys(&self, hashed_embed_id: &str) -> Result<Vec<EmbedKeyWrapper>>;

    // ── Usage ────────────────────────────────────────────────────────────
    async fn insert_usage_entry(&self, entry: &UsageEntry) -> Result<()>;
    /// Entries for one user with `start_ts <= created_at < end_ts`.
    async fn usage_entries_in_window(
        &self,
        user_id_hash: &str,
        start_ts: i64,
        end_ts: i64,
    ) -> Result<Vec<UsageEntry>>;
    /// Hashes of all users having at least one entry in the window.
    async fn usage_users_in_window(&self, start_ts: i64, end_ts: i64) -> Result<Vec<String>>;
    async fn delete_usage_entry(&self, id: &str) -> Result<()>;

    // ── Monthly summaries ────────────────────────────────────────────────
    async fn upsert_summary(&self, summary: &MonthlySummary) -> Result<()>;
    async fn summaries_for_month(
        &self,
        user_id_hash: &str,
        year_month: &str,
        kind: SummaryKind,
    ) -> Result<Vec<MonthlySummary>>;
    async fn mark_summary_archived(&self, id: &str, archive_s3_key: &str) -> Result<()>;

    // ── User profiles ────────────────────────────────────────────────────
    async fn upsert_profile(&self, profile: &UserProfile) -> Result<()>;
    async fn get_profile(&self, user_id_hash: &str) -> Result<Option<UserProfile>>;

    // ── New-chat suggestions ─────────────────────────────────────────────
    async fn insert_chat_suggestion(&self, suggestion: &ChatSuggestion) -> Result<()>;
    /// Delete one suggestion, scoped to its owner. Returns true if a row
    /// was removed.
    async fn delete_chat_suggestion(
        &self,
        hashed_user_id: &str,
        suggestion_id: &str,
    ) -> Result<bool>;
}

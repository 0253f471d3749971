//! Cache tier — the authoritative in-flight store.
//!
//! Everything conversation logic reads mid-flight lives here; the durable
//! tier trails behind it. One writer per chat id (the message router), so
//! a single `RwLock` over the inner maps gives the linearisable ordering
//! the version counters require. `get_and_delete_pending_focus_activation`
//! holds the write lock for its whole body — that is the atomicity the
//! focus-rejection race depends on, not an optimisation.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::types::{
    ChatComponent, ChatRecord, ChatVersions, EmbedRecord, InferenceMessage,
    PendingFocusActivation, TaskState,
};

/// How long a pending focus activation survives before it is unreadable.
const PENDING_FOCUS_TTL: Duration = Duration::from_secs(5);

#[derive(Default)]
struct CacheInner {
    /// Chat records by chat_id.
    chats: HashMap<String, ChatRecord>,
    /// Per-user chat index, sorted by `last_edited_overall_timestamp`
    /// descending. Keyed by `hashed_user_id`.
    chat_index: HashMap<String, Vec<(i64, String)>>,
    /// Newest-first inference history per chat.
    messages: HashMap<String, Vec<InferenceMessage>>,
    /// Embed records by embed_id.
    embeds: HashMap<String, EmbedRecord>,
    /// Embed ids attached to each chat.
    chat_embeds: HashMap<String, Vec<String>>,
    /// Chat id → running task id (drives the typing indicator).
    active_ai_tasks: HashMap<String, String>,
    /// Task lifecycle states.
    task_states: HashMap<String, TaskState>,
    /// Whole-task revoke flags.
    revoked_tasks: HashMap<String, bool>,
    /// Per-skill-execution cancel flags.
    cancelled_skills: HashMap<String, bool>,
    /// Pending focus activations with their expiry instants.
    pending_focus: HashMap<String, (PendingFocusActivation, Instant)>,
    /// user_id → vault_key_id.
    vault_key_ids: HashMap<String, String>,
}

/// In-process cache tier.
#[derive(Default)]
pub struct CacheTier {
    inner: RwLock<CacheInner>,
}

impl CacheTier {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Chats ────────────────────────────────────────────────────────────

    /// Insert or replace a chat record and reposition it in the owner's
    /// sorted index.
    pub async fn upsert_chat(&self, chat: ChatRecord) {
        let mut inner = self.inner.write().await;
        let index = inner
            .chat_index
            .entry(chat.hashed_user_id.clone())
            .or_default();
        index.retain(|(_, id)| id != &chat.chat_id);
        let pos = index
            .partition_point(|(ts, _)| *ts > chat.last_edited_overall_timestamp);
        index.insert(pos, (chat.last_edited_overall_timestamp, chat.chat_id.clone()));
        inner.chats.insert(chat.chat_id.clone(), chat);
    }

    pub async fn get_chat(&self, chat_id: &str) -> Option<ChatRecord> {
        self.inner.read().await.chats.get(chat_id).cloned()
    }

    pub async fn remove_chat(&self, hashed_user_id: &str, chat_id: &str) {
        let mut inner = self.inner.write().await;
        inner.chats.remove(chat_id);
        inner.messages.remove(chat_id);
        inner.chat_embeds.remove(chat_id);
        if let Some(index) = inner.chat_index.get_mut(hashed_user_id) {
            index.retain(|(_, id)| id != chat_id);
        }
    }

    /// Chat ids (with their version counters) for the `[start, end)` slice
    /// of the user's sorted index.
    pub async fn get_chat_ids_versions(
        &self,
        hashed_user_id: &str,
        start: usize,
        end: usize,
    ) -> Vec<(String, ChatVersions)> {
        let inner = self.inner.read().await;
        let Some(index) = inner.chat_index.get(hashed_user_id) else {
            return Vec::new();
        };
        index
            .iter()
            .skip(start)
            .take(end.saturating_sub(start))
            .filter_map(|(_, chat_id)| {
                inner
                    .chats
                    .get(chat_id)
                    .map(|c| (chat_id.clone(), c.versions.clone()))
            })
            .collect()
    }

    /// Small encrypted summary for sidebar rendering.
    pub async fn get_chat_list_item_data(&self, chat_id: &str) -> Option<ChatRecord> {
        self.get_chat(chat_id).await
    }

    pub async fn get_chat_versions(&self, chat_id: &str) -> Option<ChatVersions> {
        self.inner
            .read()
            .await
            .chats
            .get(chat_id)
            .map(|c| c.versions.clone())
    }

    /// Atomic counter bump; returns the new value. Also advances the
    /// chat's position in the sorted index.
    pub async fn increment_chat_component_version(
        &self,
        chat_id: &str,
        component: ChatComponent,
        edited_at: i64,
    ) -> Option<u64> {
        let mut inner = self.inner.write().await;
        let chat = inner.chats.get_mut(chat_id)?;
        let new_version = chat.versions.increment(component);
        chat.last_edited_overall_timestamp = edited_at;
        let hashed_user_id = chat.hashed_user_id.clone();
        let chat_id_owned = chat.chat_id.clone();
        if let Some(index) = inner.chat_index.get_mut(&hashed_user_id) {
            index.retain(|(_, id)| id != &chat_id_owned);
            let pos = index.partition_point(|(ts, _)| *ts > edited_at);
            index.insert(pos, (edited_at, chat_id_owned));
        }
        Some(new_version)
    }

    pub async fn update_chat_active_focus_id(
        &self,
        chat_id: &str,
        encrypted_focus_id: Option<String>,
    ) {
        let mut inner = self.inner.write().await;
        if let Some(chat) = inner.chats.get_mut(chat_id) {
            chat.encrypted_active_focus_id = encrypted_focus_id;
        }
    }

    pub async fn chat_count(&self, hashed_user_id: &str) -> usize {
        self.inner
            .read()
            .await
            .chat_index
            .get(hashed_user_id)
            .map(Vec::len)
            .unwrap_or(0)
    }

    // ── Messages ─────────────────────────────────────────────────────────

    /// Prepend a message to the chat's inference history (newest first).
    pub async fn push_message(&self, chat_id: &str, message: InferenceMessage) {
        let mut inner = self.inner.write().await;
        inner
            .messages
            .entry(chat_id.to_string())
            .or_default()
            .insert(0, message);
    }

    /// Newest-first inference history. The runner reverses it.
    pub async fn get_ai_messages_history(&self, chat_id: &str) -> Vec<InferenceMessage> {
        self.inner
            .read()
            .await
            .messages
            .get(chat_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Remove from the inference history. Returns true if a row was removed.
    pub async fn remove_message_from_cache(&self, chat_id: &str, message_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        let Some(messages) = inner.messages.get_mut(chat_id) else {
            return false;
        };
        let before = messages.len();
        messages.retain(|m| m.message_id != message_id);
        before != messages.len()
    }

    // ── Embeds ───────────────────────────────────────────────────────────

    pub async fn upsert_embed(&self, embed: EmbedRecord) {
        let mut inner = self.inner.write().await;
        if let Some(chat_hash) = &embed.hashed_chat_id {
            let list = inner.chat_embeds.entry(chat_hash.clone()).or_default();
            if !list.contains(&embed.embed_id) {
                list.push(embed.embed_id.clone());
            }
        }
        inner.embeds.insert(embed.embed_id.clone(), embed);
    }

    pub async fn get_embed(&self, embed_id: &str) -> Option<EmbedRecord> {
        self.inner.read().await.embeds.get(embed_id).cloned()
    }

    pub async fn remove_embed_from_chat_cache(&self, hashed_chat_id: &str, embed_id: &str) {
        let mut inner = self.inner.write().await;
        if let Some(list) = inner.chat_embeds.get_mut(hashed_chat_id) {
            list.retain(|id| id != embed_id);
        }
        inner.embeds.remove(embed_id);
    }

    // ── Task markers ─────────────────────────────────────────────────────

    pub async fn set_active_ai_task(&self, chat_id: &str, task_id: &str) {
        self.inner
            .write()
            .await
            .active_ai_tasks
            .insert(chat_id.to_string(), task_id.to_string());
    }

    pub async fn get_active_ai_task(&self, chat_id: &str) -> Option<String> {
        self.inner.read().await.active_ai_tasks.get(chat_id).cloned()
    }

    /// Clear the typing-indicator marker. When `task_id` is given, clears
    /// only if the marker still belongs to that task.
    pub async fn clear_active_ai_task(&self, chat_id: &str, task_id: Option<&str>) {
        let mut inner = self.inner.write().await;
        match (inner.active_ai_tasks.get(chat_id), task_id) {
            (Some(current), Some(expected)) if current != expected => {},
            (Some(_), _) => {
                inner.active_ai_tasks.remove(chat_id);
            },
            (None, _) => {},
        }
    }

    pub async fn set_task_state(&self, task_id: &str, state: TaskState) {
        self.inner
            .write()
            .await
            .task_states
            .insert(task_id.to_string(), state);
    }

    pub async fn get_task_state(&self, task_id: &str) -> Option<TaskState> {
        self.inner.read().await.task_states.get(task_id).copied()
    }

    pub async fn revoke_task(&self, task_id: &str) {
        self.inner
            .write()
            .await
            .revoked_tasks
            .insert(task_id.to_string(), true);
    }

    pub async fn is_task_revoked(&self, task_id: &str) -> bool {
        self.inner
            .read()
            .await
            .revoked_tasks
            .get(task_id)
            .copied()
            .unwrap_or(false)
    }

    pub async fn clear_task_flags(&self, task_id: &str) {
        self.inner.write().await.revoked_tasks.remove(task_id);
    }

    pub async fn cancel_skill(&self, skill_task_id: &str) {
        self.inner
            .write()
            .await
            .cancelled_skills
            .insert(skill_task_id.to_string(), true);
    }

    pub async fn is_skill_cancelled(&self, skill_task_id: &str) -> bool {
        self.inner
            .read()
            .await
            .cancelled_skills
            .get(skill_task_id)
            .copied()
            .unwrap_or(false)
    }

    // ── Pending focus activation ─────────────────────────────────────────

    pub async fn put_pending_focus_activation(&self, activation: PendingFocusActivation) {
        let chat_id = activation.chat_id.clone();
        let deadline = Instant::now() + PENDING_FOCUS_TTL;
        let mut inner = self.inner.write().await;
        if inner.pending_focus.contains_key(&chat_id) {
            warn!(chat_id, "replacing existing pending focus activation");
        }
        inner.pending_focus.insert(chat_id, (activation, deadline));
    }

    /// Atomic get-and-delete. Exactly one caller — the auto-confirm timer
    /// or the client rejection handler — observes the record.
    pub async fn get_and_delete_pending_focus_activation(
        &self,
        chat_id: &str,
    ) -> Option<PendingFocusActivation> {
        let mut inner = self.inner.write().await;
        let (activation, deadline) = inner.pending_focus.remove(chat_id)?;
        if Instant::now() > deadline {
            debug!(chat_id, "pending focus activation expired before consumption");
            return None;
        }
        Some(activation)
    }

    // ── Vault key ids ────────────────────────────────────────────────────

    pub async fn set_user_vault_key_id(&self, user_id: &str, vault_key_id: &str) {
        self.inner
            .write()
            .await
            .vault_key_ids
            .insert(user_id.to_string(), vault_key_id.to_string());
    }

    pub async fn get_user_vault_key_id(&self, user_id: &str) -> Option<String> {
        self.inner.read().await.vault_key_ids.get(user_id).cloned()
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MessageRole;

    fn chat(chat_id: &str, user_hash: &str, edited: i64) -> ChatRecord {
        ChatRecord {
            chat_id: chat_id.into(),
            hashed_user_id: user_hash.into(),
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
        }
    }

    fn message(id: &str, created_at: i64) -> InferenceMessage {
        InferenceMessage {
            message_id: id.into(),
            role: MessageRole::User,
            wrapped_content: format!("vault:v1:{id}"),
            created_at,
            sender_name: None,
        }
    }

    #[tokio::test]
    async fn chat_index_orders_by_last_edited_desc() {
        let cache = CacheTier::new();
        cache.upsert_chat(chat("c1", "u", 100)).await;
        cache.upsert_chat(chat("c2", "u", 300)).await;
        cache.upsert_chat(chat("c3", "u", 200)).await;

        let ids: Vec<String> = cache
            .get_chat_ids_versions("u", 0, 10)
            .await
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec!["c2", "c3", "c1"]);
    }

    #[tokio::test]
    async fn version_increment_moves_chat_to_front() {
        let cache = CacheTier::new();
        cache.upsert_chat(chat("c1", "u", 100)).await;
        cache.upsert_chat(chat("c2", "u", 200)).await;

        let v = cache
            .increment_chat_component_version("c1", ChatComponent::Messages, 400)
            .await
            .unwrap();
        assert_eq!(v, 1);

        let ids: Vec<String> = cache
            .get_chat_ids_versions("u", 0, 10)
            .await
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec!["c1", "c2"]);
    }

    #[tokio::test]
    async fn messages_are_newest_first() {
        let cache = CacheTier::new();
        cache.push_message("c1", message("m1", 1)).await;
        cache.push_message("c1", message("m2", 2)).await;

        let history = cache.get_ai_messages_history("c1").await;
        assert_eq!(history[0].message_id, "m2");
        assert_eq!(history[1].message_id, "m1");
    }

    #[tokio::test]
    async fn remove_message_reports_whether_found() {
        let cache = CacheTier::new();
        cache.push_message("c1", message("m1", 1)).await;
        assert!(cache.remove_message_from_cache("c1", "m1").await);
        assert!(!cache.remove_message_from_cache("c1", "m1").await);
    }

    #[tokio::test]
    async fn pending_focus_is_consumed_exactly_once() {
        let cache = CacheTier::new();
        cache
            .put_pending_focus_activation(PendingFocusActivation {
                chat_id: "c1".into(),
                user_id: "u".into(),
                user_id_hash: "uh".into(),
                message_id: "m".into(),
                task_id: "t".into(),
                focus_id: "f".into(),
                mate_id: None,
                chat_has_title: false,
                is_incognito: false,
            })
            .await;

        let first = cache.get_and_delete_pending_focus_activation("c1").await;
        let second = cache.get_and_delete_pending_focus_activation("c1").await;
        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn clear_active_task_respects_ownership() {
        let cache = CacheTier::new();
        cache.set_active_ai_task("c1", "t1").await;
        // A stale task may not clear a newer marker.
        cache.clear_active_ai_task("c1", Some("t0")).await;
        assert_eq!(cache.get_active_ai_task("c1").await.as_deref(), Some("t1"));
        cache.clear_active_ai_task("c1", Some("t1")).await;
        assert!(cache.get_active_ai_task("c1").await.is_none());
    }

    #[tokio::test]
    async fn skill_cancel_flag_round_trip() {
        let cache = CacheTier::new();
        assert!(!cache.is_skill_cancelled("s1").await);
        cache.cancel_skill("s1").await;
        assert!(cache.is_skill_cancelled("s1").await);
    }
}

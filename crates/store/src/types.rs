//! Record types for the zero-knowledge store.
//!
//! Field naming convention: `encrypted_*` fields hold client ciphertext the
//! server cannot read; `hashed_*` fields hold SHA-256 hex digests of
//! identifiers. The server may read roles, timestamps, status flags, and
//! version counters — nothing else.

use serde::{Deserialize, Serialize};

// ── Chats ────────────────────────────────────────────────────────────────────

/// Monotonic per-component version counters for one chat. Incremented only
/// by the message router (single writer per chat).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatVersions {
    pub messages_v: u64,
    pub title_v: u64,
    pub focus_v: u64,
    pub category_v: u64,
    pub summary_v: u64,
    pub tags_v: u64,
}

/// Which version counter to bump.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatComponent {
    Messages,
    Title,
    Focus,
    Category,
    Summary,
    Tags,
}

impl ChatVersions {
    /// Bump one counter, returning the new value.
    pub fn increment(&mut self, component: ChatComponent) -> u64 {
        let slot = match component {
            ChatComponent::Messages => &mut self.messages_v,
            ChatComponent::Title => &mut self.title_v,
            ChatComponent::Focus => &mut self.focus_v,
            ChatComponent::Category => &mut self.category_v,
            ChatComponent::Summary => &mut self.summary_v,
            ChatComponent::Tags => &mut self.tags_v,
        };
        *slot += 1;
        *slot
    }
}

/// A conversation container. One owner, all content opaque.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRecord {
    pub chat_id: String,
    pub hashed_user_id: String,
    #[serde(default)]
    pub encrypted_title: Option<String>,
    /// The chat's symmetric key, wrapped by the owner's master key
    /// client-side. Opaque to the server.
    #[serde(default)]
    pub encrypted_chat_key: Option<String>,
    #[serde(default)]
    pub encrypted_active_focus_id: Option<String>,
    #[serde(default)]
    pub encrypted_category: Option<String>,
    #[serde(default)]
    pub encrypted_summary: Option<String>,
    #[serde(default)]
    pub encrypted_tag_list: Option<String>,
    pub last_message_timestamp: i64,
    /// Ordering key for the sidebar index; any component edit moves it.
    pub last_edited_overall_timestamp: i64,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub is_shared: bool,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub versions: ChatVersions,
}

// ── Messages ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
}

/// Lifecycle status persisted on assistant messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub message_id: String,
    pub hashed_message_id: String,
    pub hashed_chat_id: String,
    pub hashed_user_id: String,
    pub role: MessageRole,
    /// Client-encrypted body. System messages may carry structured YAML
    /// inside the ciphertext; the server never sees it.
    pub encrypted_content: String,
    #[serde(default)]
    pub status: Option<MessageStatus>,
    pub created_at: i64,
}

/// The cache-tier copy of a message used to rebuild LLM context. The body
/// here is wrapped under the *user's transit key* (not the chat key), so
/// only the inference path — holding that user's `vault_key_id` — can
/// recover it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceMessage {
    pub message_id: String,
    pub role: MessageRole,
    /// `vault:v1:...` wrapped plaintext.
    pub wrapped_content: String,
    pub created_at: i64,
    #[serde(default)]
    pub sender_name: Option<String>,
}

// ── Embeds ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncryptionMode {
    /// Client-side key only — undecryptable by the server.
    Client,
    /// A transit-wrapped copy of the key exists; the server may decrypt on
    /// the owner's behalf for download paths.
    Vault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedStatus {
    InProgress,
    Finished,
    Failed,
    Cancelled,
}

impl EmbedStatus {
    /// Status transitions are one-way except `in_progress → cancelled`.
    pub fn can_transition_to(self, next: EmbedStatus) -> bool {
        match self {
            Self::InProgress => true,
            Self::Finished | Self::Failed | Self::Cancelled => self == next,
        }
    }
}

/// An artifact referenced from inside a message. The embed key itself lives
/// in the separate key-wrapping collection, never on this record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedRecord {
    pub embed_id: String,
    pub hashed_embed_id: String,
    pub encryption_mode: EncryptionMode,
    /// TOON or JSON ciphertext.
    pub encrypted_content: String,
    pub hashed_user_id: String,
    #[serde(default)]
    pub hashed_chat_id: Option<String>,
    #[serde(default)]
    pub hashed_message_id: Option<String>,
    #[serde(default)]
    pub r#type: Option<String>,
    #[serde(default)]
    pub share_mode: Option<String>,
    #[serde(default)]
    pub parent_embed_id: Option<String>,
    #[serde(default)]
    pub child_embed_ids: Vec<String>,
    #[serde(default)]
    pub version_number: Option<u32>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub content_hash: Option<String>,
    pub status: EmbedStatus,
    #[serde(default)]
    pub text_length_chars: Option<u64>,
    pub created_at: i64,
    pub updated_at: i64,
}

// ── Embed key wrappers ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedKeyType {
    /// Owner's cross-chat access wrapper (embed key under master key).
    Master,
    /// Embed key under a chat key, for shared chats.
    Chat,
}

/// One row linking an embed key to one access path. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedKeyWrapper {
    pub hashed_embed_id: String,
    pub key_type: EmbedKeyType,
    /// Required iff `key_type == Chat`.
    #[serde(default)]
    pub hashed_chat_id: Option<String>,
    pub encrypted_embed_key: String,
    pub hashed_user_id: String,
    pub created_at: i64,
}

// ── Tasks ────────────────────────────────────────────────────────────────────

/// Lifecycle of one AI task. `queued → running → (completed | cancelled
/// | failed)`; `scheduled` covers rate-limit re-enqueues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Queued,
    Running,
    Scheduled,
    Completed,
    Cancelled,
    Failed,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled | Self::Failed)
    }
}

// ── Pending focus activation ─────────────────────────────────────────────────

/// Context stored while a proposed focus mode counts down to auto-confirm.
/// Consumed exactly once, by whichever of {auto-confirm, client rejection}
/// gets there first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingFocusActivation {
    pub chat_id: String,
    pub user_id: String,
    pub user_id_hash: String,
    pub message_id: String,
    pub task_id: String,
    pub focus_id: String,
    #[serde(default)]
    pub mate_id: Option<String>,
    #[serde(default)]
    pub chat_has_title: bool,
    #[serde(default)]
    pub is_incognito: bool,
}

// ── Usage entries ────────────────────────────────────────────────────────────

/// Immutable usage record created on skill or LLM call completion.
/// Numeric fields are client-readable only after transit decryption.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEntry {
    pub id: String,
    pub user_id_hash: String,
    pub app_id: String,
    pub skill_id: String,
    pub encrypted_credits_costs_total: String,
    pub encrypted_model_used: String,
    pub encrypted_input_tokens: String,
    pub encrypted_output_tokens: String,
    pub created_at: i64,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
    #[serde(default)]
    pub api_key_hash: Option<String>,
}

/// Which monthly summary family a record belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SummaryKind {
    Chat,
    App,
    ApiKey,
}

impl SummaryKind {
    pub const ALL: [SummaryKind; 3] = [Self::Chat, Self::App, Self::ApiKey];

    pub fn collection(self) -> &'static str {
        match self {
            Self::Chat => "usage_monthly_chat_summaries",
            Self::App => "usage_monthly_app_summaries",
            Self::ApiKey => "usage_monthly_api_key_summaries",
        }
    }
}

/// Monthly roll-up row; flagged once the per-entry rows move to cold storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthlySummary {
    pub id: String,
    pub user_id_hash: String,
    pub year_month: String,
    pub kind: SummaryKind,
    pub encrypted_totals: String,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub archive_s3_key: Option<String>,
}

// ── User profiles ────────────────────────────────────────────────────────────

/// Server-side per-user profile. Holds the transit key pointer and the
/// (transit-encrypted) notification settings — never chat material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub user_id_hash: String,
    pub vault_key_id: String,
    #[serde(default)]
    pub email_notifications_enabled: bool,
    /// Address re-encrypted server-side under the user's transit key.
    #[serde(default)]
    pub encrypted_notification_email: Option<String>,
    #[serde(default)]
    pub notification_preferences: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_increment_is_per_component() {
        let mut versions = ChatVersions::default();
        assert_eq!(versions.increment(ChatComponent::Messages), 1);
        assert_eq!(versions.increment(ChatComponent::Messages), 2);
        assert_eq!(versions.increment(ChatComponent::Title), 1);
        assert_eq!(versions.messages_v, 2);
        assert_eq!(versions.title_v, 1);
        assert_eq!(versions.focus_v, 0);
    }

    #[test]
    fn embed_status_transitions_are_one_way() {
        assert!(EmbedStatus::InProgress.can_transition_to(EmbedStatus::Cancelled));
        assert!(EmbedStatus::InProgress.can_transition_to(EmbedStatus::Finished));
        assert!(!EmbedStatus::Finished.can_transition_to(EmbedStatus::InProgress));
        assert!(!EmbedStatus::Cancelled.can_transition_to(EmbedStatus::Finished));
        assert!(EmbedStatus::Failed.can_transition_to(EmbedStatus::Failed));
    }

    #[test]
    fn summary_kind_collections_are_distinct() {
        let names: Vec<_> = SummaryKind::ALL.iter().map(|k| k.collection()).collect();
        assert_eq!(names.len(), 3);
        assert!(names.iter().all(|n| n.starts_with("usage_monthly_")));
    }
}

//! WebSocket wire contract between clients and the gateway.
//!
//! All communication uses JSON envelopes of the shape
//! `{ "type": "<event>", "payload": { ... } }`. Inbound events are modelled
//! by [`ClientEvent`], outbound pushes by [`ServerEvent`]. Event names are
//! part of the wire contract and must not change.

use serde::{Deserialize, Serialize};

// ── Constants ────────────────────────────────────────────────────────────────

/// How long a disconnected device keeps its session state before removal.
pub const GRACE_PERIOD_SECONDS: u64 = 30;
/// Maximum inbound WS payload.
pub const MAX_PAYLOAD_BYTES: usize = 1_048_576; // 1 MB
/// Upper bound for the `load_more_chats` pager limit.
pub const LOAD_MORE_MAX_LIMIT: usize = 50;
/// Pending focus activation record lifetime. Strictly greater than
/// [`FOCUS_AUTO_CONFIRM_SECONDS`] so the auto-confirm timer always finds
/// the record unless the client consumed it first.
pub const PENDING_FOCUS_TTL_SECONDS: u64 = 5;
/// Delay before a proposed focus mode auto-confirms.
pub const FOCUS_AUTO_CONFIRM_SECONDS: u64 = 4;
/// Timeout for internal service-to-service HTTP calls.
pub const INTERNAL_TIMEOUT_SECONDS: u64 = 10;
/// Timeout for LLM provider HTTP calls.
pub const PROVIDER_TIMEOUT_SECONDS: u64 = 15;
/// Timeout for upload-service HTTP calls.
pub const UPLOAD_TIMEOUT_SECONDS: u64 = 30;
/// Maximum accepted upload size (inclusive).
pub const MAX_UPLOAD_BYTES: u64 = 100 * 1024 * 1024;
/// Maximum accepted PDF page count (inclusive).
pub const MAX_PDF_PAGES: usize = 1000;
/// Credits charged per PDF page at upload time.
pub const CREDITS_PER_PDF_PAGE: i64 = 3;
/// Header carrying the shared secret on `/internal/*` endpoints.
pub const INTERNAL_TOKEN_HEADER: &str = "x-internal-service-token";

// ── Error codes ──────────────────────────────────────────────────────────────

pub mod error_codes {
    pub const INVALID_REQUEST: &str = "INVALID_REQUEST";
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const PROVIDER_TRANSIENT: &str = "PROVIDER_TRANSIENT";
    pub const PROVIDER_PERMANENT: &str = "PROVIDER_PERMANENT";
    pub const CANCELLED: &str = "CANCELLED";
    pub const INTEGRITY_BLOCKED: &str = "INTEGRITY_BLOCKED";
    pub const INFRASTRUCTURE: &str = "INFRASTRUCTURE";
    pub const INSUFFICIENT_CREDITS: &str = "INSUFFICIENT_CREDITS";
}

// ── Error shape ──────────────────────────────────────────────────────────────

/// User-visible error payload. Messages are deliberately coarse; detailed
/// causes go to the log under the task correlation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorShape {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorShape {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(message: impl Into<String>, details: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: Some(details.into()),
        }
    }
}

// ── Inbound events ───────────────────────────────────────────────────────────

/// A new user message entering a chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageReceivedPayload {
    pub chat_id: String,
    pub message_id: String,
    /// Client-encrypted message body. Opaque to the server.
    pub encrypted_content: String,
    /// Plaintext copy for the inference path only; wrapped under the user's
    /// transit key before it ever reaches a cache, never stored raw.
    pub content: String,
    #[serde(default)]
    pub mate_id: Option<String>,
    #[serde(default)]
    pub chat_has_title: bool,
    #[serde(default)]
    pub is_incognito: bool,
    /// Skill keys the preprocessor allowed for this turn. Absent means
    /// the router exposes every callable skill.
    #[serde(default)]
    pub preselected_skills: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelAiTaskPayload {
    pub task_id: String,
    pub chat_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelSkillPayload {
    pub skill_task_id: String,
    #[serde(default)]
    pub embed_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FocusModeRejectedPayload {
    pub chat_id: String,
    pub focus_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreEmbedPayload {
    pub embed_id: String,
    #[serde(default)]
    pub r#type: Option<String>,
    pub encrypted_content: String,
    pub hashed_user_id: String,
    #[serde(default)]
    pub hashed_chat_id: Option<String>,
    #[serde(default)]
    pub hashed_message_id: Option<String>,
    #[serde(default)]
    pub encryption_mode: Option<String>,
    #[serde(default)]
    pub share_mode: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub embed_ids: Option<Vec<String>>,
    #[serde(default)]
    pub parent_embed_id: Option<String>,
    #[serde(default)]
    pub version_number: Option<u32>,
    #[serde(default)]
    pub file_path: Option<String>,
    #[serde(default)]
    pub content_hash: Option<String>,
    #[serde(default)]
    pub text_length_chars: Option<u64>,
    #[serde(default)]
    pub is_private: Option<bool>,
    #[serde(default)]
    pub is_shared: Option<bool>,
    #[serde(rename = "createdAt")]
    pub created_at: i64,
    #[serde(rename = "updatedAt")]
    pub updated_at: i64,
}

/// One embed-key wrapper as shipped by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedKeyPayload {
    pub hashed_embed_id: String,
    /// `master` or `chat`.
    pub key_type: String,
    #[serde(default)]
    pub hashed_chat_id: Option<String>,
    pub encrypted_embed_key: String,
    pub hashed_user_id: String,
    #[serde(default)]
    pub created_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreEmbedKeysPayload {
    pub keys: Vec<EmbedKeyPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEmbedPayload {
    pub embed_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteMessagePayload {
    #[serde(rename = "chatId")]
    pub chat_id: String,
    #[serde(rename = "messageId")]
    pub message_id: String,
    #[serde(default, rename = "embedIdsToDelete")]
    pub embed_ids_to_delete: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteNewChatSuggestionPayload {
    pub suggestion_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailNotificationSettingsPayload {
    pub enabled: bool,
    /// Plaintext address; the server re-encrypts it under the user's transit
    /// key before persisting.
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub preferences: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemMessagePayload {
    pub chat_id: String,
    /// Structured chat-event payload (YAML body inside).
    pub message: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadMoreChatsPayload {
    pub offset: usize,
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetActiveChatPayload {
    #[serde(default)]
    pub chat_id: Option<String>,
}

/// Every inbound event the router dispatches, discriminated by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientEvent {
    MessageReceived(MessageReceivedPayload),
    CancelAiTask(CancelAiTaskPayload),
    CancelSkill(CancelSkillPayload),
    FocusModeRejected(FocusModeRejectedPayload),
    StoreEmbed(StoreEmbedPayload),
    StoreEmbedKeys(StoreEmbedKeysPayload),
    RequestEmbed(RequestEmbedPayload),
    DeleteMessage(DeleteMessagePayload),
    DeleteNewChatSuggestion(DeleteNewChatSuggestionPayload),
    EmailNotificationSettings(EmailNotificationSettingsPayload),
    ChatSystemMessageAdded(SystemMessagePayload),
    LoadMoreChats(LoadMoreChatsPayload),
    SetActiveChat(SetActiveChatPayload),
}

impl ClientEvent {
    /// Wire name of the event (used for logging).
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MessageReceived(_) => "message_received",
            Self::CancelAiTask(_) => "cancel_ai_task",
            Self::CancelSkill(_) => "cancel_skill",
            Self::FocusModeRejected(_) => "focus_mode_rejected",
            Self::StoreEmbed(_) => "store_embed",
            Self::StoreEmbedKeys(_) => "store_embed_keys",
            Self::RequestEmbed(_) => "request_embed",
            Self::DeleteMessage(_) => "delete_message",
            Self::DeleteNewChatSuggestion(_) => "delete_new_chat_suggestion",
            Self::EmailNotificationSettings(_) => "email_notification_settings",
            Self::ChatSystemMessageAdded(_) => "chat_system_message_added",
            Self::LoadMoreChats(_) => "load_more_chats",
            Self::SetActiveChat(_) => "set_active_chat",
        }
    }
}

// ── Outbound events ──────────────────────────────────────────────────────────

/// Chat-list item returned by the pager. Metadata only — messages load
/// on demand when the user opens the chat.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatListItem {
    pub chat_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted_category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encrypted_summary: Option<String>,
    pub last_message_timestamp: i64,
    pub pinned: bool,
    pub versions: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadMoreChatsResponse {
    pub chats: Vec<ChatListItem>,
    pub has_more: bool,
    pub total_count: usize,
    pub offset: usize,
}

/// Server → client push, discriminated by `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    MessageDeleted {
        chat_id: String,
        message_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        embed_ids_deleted: Option<Vec<String>>,
    },
    NewSystemMessage {
        chat_id: String,
        message: serde_json::Value,
    },
    EmbedUpdate {
        embed_id: String,
        status: String,
        #[serde(default)]
        child_embed_ids: Vec<String>,
    },
    SendEmbedData(Box<EmbedData>),
    AiTaskChunk {
        task_id: String,
        chat_id: String,
        /// `text` or `thinking`.
        kind: String,
        content: String,
    },
    AiTaskCompleted {
        task_id: String,
        chat_id: String,
        status: String,
    },
    AiTaskScheduled {
        task_id: String,
        chat_id: String,
        wait_time_seconds: u64,
    },
    AiTaskCancelRequested {
        task_id: String,
        status: String,
    },
    SkillCancelRequested {
        skill_task_id: String,
        status: String,
    },
    FocusModeRejectedAck {
        chat_id: String,
        focus_id: String,
        status: String,
        caught_before_activation: bool,
    },
    RequestAppSettingsMemories {
        request_id: String,
        chat_id: String,
        requested_keys: Vec<String>,
        yaml_content: String,
        message_id: String,
    },
    LoadMoreChatsResponse(LoadMoreChatsResponse),
    EmailNotificationSettingsAck {
        status: String,
    },
    EmailNotificationSettingsUpdated {
        enabled: bool,
    },
    Error(ErrorShape),
}

/// Payload for `send_embed_data`. `content` is plaintext only for
/// vault-mode embeds the server decrypted on the owner's behalf.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedData {
    pub embed_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#type: Option<String>,
    pub content: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub share_mode: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embed_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_embed_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_number: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
}

impl ServerEvent {
    /// Wire name of the event.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MessageDeleted { .. } => "message_deleted",
            Self::NewSystemMessage { .. } => "new_system_message",
            Self::EmbedUpdate { .. } => "embed_update",
            Self::SendEmbedData(_) => "send_embed_data",
            Self::AiTaskChunk { .. } => "ai_task_chunk",
            Self::AiTaskCompleted { .. } => "ai_task_completed",
            Self::AiTaskScheduled { .. } => "ai_task_scheduled",
            Self::AiTaskCancelRequested { .. } => "ai_task_cancel_requested",
            Self::SkillCancelRequested { .. } => "skill_cancel_requested",
            Self::FocusModeRejectedAck { .. } => "focus_mode_rejected_ack",
            Self::RequestAppSettingsMemories { .. } => "request_app_settings_memories",
            Self::LoadMoreChatsResponse(_) => "load_more_chats_response",
            Self::EmailNotificationSettingsAck { .. } => "email_notification_settings_ack",
            Self::EmailNotificationSettingsUpdated { .. } => {
                "email_notification_settings_updated"
            },
            Self::Error(_) => "error",
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn client_event_round_trips_by_type_tag() {
        let json = serde_json::json!({
            "type": "cancel_ai_task",
            "payload": { "task_id": "t1", "chat_id": "c1" }
        });
        let event: ClientEvent = serde_json::from_value(json).unwrap();
        match &event {
            ClientEvent::CancelAiTask(p) => {
                assert_eq!(p.task_id, "t1");
                assert_eq!(p.chat_id, "c1");
            },
            other => panic!("unexpected event: {other:?}"),
        }
        assert_eq!(event.kind(), "cancel_ai_task");
    }

    #[test]
    fn delete_message_uses_camel_case_fields() {
        let json = serde_json::json!({
            "type": "delete_message",
            "payload": {
                "chatId": "c1",
                "messageId": "m1",
                "embedIdsToDelete": ["e1", "e2"]
            }
        });
        let event: ClientEvent = serde_json::from_value(json).unwrap();
        let ClientEvent::DeleteMessage(p) = event else {
            panic!("wrong variant");
        };
        assert_eq!(p.chat_id, "c1");
        assert_eq!(p.embed_ids_to_delete.unwrap().len(), 2);
    }

    #[test]
    fn server_event_serializes_with_type_tag() {
        let event = ServerEvent::AiTaskCancelRequested {
            task_id: "t9".into(),
            status: "revocation_sent".into(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "ai_task_cancel_requested");
        assert_eq!(value["payload"]["task_id"], "t9");
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let json = serde_json::json!({ "type": "bogus_event", "payload": {} });
        assert!(serde_json::from_value::<ClientEvent>(json).is_err());
    }

    #[test]
    fn focus_ttl_exceeds_auto_confirm_delay() {
        assert!(PENDING_FOCUS_TTL_SECONDS > FOCUS_AUTO_CONFIRM_SECONDS);
    }
}

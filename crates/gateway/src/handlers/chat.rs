//! Chat lifecycle handlers: message creation, deletion, system messages,
//! paging, suggestions.
//!
//! Delivery order for every state change: cache first (version counter
//! bumped — the commit point for in-flight logic), durable persistence
//! second, sibling broadcast third.

use tracing::{debug, info};
use uuid::Uuid;

use veil_common::{now_unix_secs, sha256_hex};
use veil_protocol::{
    ChatListItem, DeleteMessagePayload, DeleteNewChatSuggestionPayload, LoadMoreChatsPayload,
    LoadMoreChatsResponse, MessageReceivedPayload, ServerEvent, SystemMessagePayload,
};
use veil_store::{
    OwnershipStatus, load_more_chats,
    types::{
        ChatComponent, ChatRecord, ChatVersions, InferenceMessage, MessageRecord, MessageRole,
        TaskState,
    },
};
use veil_tasks::{AskTaskRequest, queue::QUEUE_APP_AI};

use crate::{Result, router::EventContext};

/// A user message entered a chat: commit it, then enqueue the ask task.
pub async fn handle_message_received(
    ctx: &EventContext,
    payload: MessageReceivedPayload,
) -> Result<()> {
    let ownership = ctx.ensure_chat_ownership(&payload.chat_id).await?;
    let now = now_unix_secs() as i64;
    let vault_key_id = ctx.vault_key_id().await?;
    let state = &ctx.state;

    // First write to a local-first chat binds the owner.
    let mut chat = match state.cache.get_chat(&payload.chat_id).await {
        Some(chat) => chat,
        None => match state.durable.get_chat(&payload.chat_id).await? {
            Some(chat) => chat,
            None => {
                debug!(chat_id = %payload.chat_id, "binding new chat to owner");
                debug_assert_eq!(ownership, OwnershipStatus::NewChat);
                ChatRecord {
                    chat_id: payload.chat_id.clone(),
                    hashed_user_id: ctx.user_id_hash.clone(),
                    encrypted_title: None,
                    encrypted_chat_key: None,
                    encrypted_active_focus_id: None,
                    encrypted_category: None,
                    encrypted_summary: None,
                    encrypted_tag_list: None,
                    last_message_timestamp: now,
                    last_edited_overall_timestamp: now,
                    pinned: false,
                    is_shared: false,
                    is_private: false,
                    versions: ChatVersions::default(),
                }
            },
        },
    };
    chat.last_message_timestamp = now;
    state.cache.upsert_chat(chat.clone()).await;

    // Inference copy, wrapped under the user's transit key. The raw
    // plaintext never touches any store.
    let wrapped = state.vault.wrap_str(&vault_key_id, &payload.content).await?;
    state
        .cache
        .push_message(&payload.chat_id, InferenceMessage {
            message_id: payload.message_id.clone(),
            role: MessageRole::User,
            wrapped_content: wrapped,
            created_at: now,
            sender_name: None,
        })
        .await;
    state
        .cache
        .increment_chat_component_version(&payload.chat_id, ChatComponent::Messages, now)
        .await;

    // Durable persistence of the client-encrypted record.
    let record = MessageRecord {
        hashed_message_id: sha256_hex(&payload.message_id),
        message_id: payload.message_id.clone(),
        hashed_chat_id: sha256_hex(&payload.chat_id),
        hashed_user_id: ctx.user_id_hash.clone(),
        role: MessageRole::User,
        encrypted_content: payload.encrypted_content.clone(),
        status: None,
        created_at: now,
    };
    state.durable.insert_message(&record).await?;
    if let Some(cached) = state.cache.get_chat(&payload.chat_id).await {
        state.durable.upsert_chat(&cached).await?;
    }

    // One task per user message; the task id doubles as the assistant
    // message id.
    let task_id = Uuid::new_v4().to_string();
    let preselected = match payload.preselected_skills {
        Some(keys) => Some(keys.into_iter().collect()),
        // No preprocessor verdict: expose every callable skill.
        None => Some(state.skills.keys().into_iter().collect()),
    };
    let request = AskTaskRequest {
        task_id: task_id.clone(),
        chat_id: payload.chat_id.clone(),
        user_id: ctx.user_id.clone(),
        user_id_hash: ctx.user_id_hash.clone(),
        message_id: payload.message_id,
        mate_id: payload.mate_id,
        active_focus_id: None,
        chat_has_title: payload.chat_has_title,
        is_incognito: payload.is_incognito,
        preselected_skills: preselected,
        is_focus_continuation: false,
        continuation_message_id: None,
        origin_device_hash: Some(ctx.device_hash.clone()),
    };
    state.cache.set_task_state(&task_id, TaskState::Queued).await;
    state.queue.enqueue(QUEUE_APP_AI, request).await;

    info!(chat_id = %payload.chat_id, task_id = %task_id, "ask task enqueued");
    Ok(())
}

pub async fn handle_delete_message(
    ctx: &EventContext,
    payload: DeleteMessagePayload,
) -> Result<()> {
    ctx.ensure_chat_ownership(&payload.chat_id).await?;
    let state = &ctx.state;
    let now = now_unix_secs() as i64;

    state
        .cache
        .remove_message_from_cache(&payload.chat_id, &payload.message_id)
        .await;
    state
        .cache
        .increment_chat_component_version(&payload.chat_id, ChatComponent::Messages, now)
        .await;
    state
        .durable
        .delete_message(
            &sha256_hex(&payload.chat_id),
            &sha256_hex(&payload.message_id),
        )
        .await?;

    let embed_ids = payload.embed_ids_to_delete.unwrap_or_default();
    for embed_id in &embed_ids {
        state
            .cache
            .remove_embed_from_chat_cache(&sha256_hex(&payload.chat_id), embed_id)
            .await;
        state.durable.delete_embed(embed_id).await?;
    }

    ctx.notify_siblings(ServerEvent::MessageDeleted {
        chat_id: payload.chat_id,
        message_id: payload.message_id,
        embed_ids_deleted: (!embed_ids.is_empty()).then_some(embed_ids),
    })
    .await;
    Ok(())
}

/// System messages are first-class rows; their ciphertext may carry
/// structured YAML chat events the server never reads.
pub async fn handle_system_message(
    ctx: &EventContext,
    payload: SystemMessagePayload,
) -> Result<()> {
    ctx.ensure_chat_ownership(&payload.chat_id).await?;
    let state = &ctx.state;
    let now = now_unix_secs() as i64;

    let message_id = payload.message["message_id"]
        .as_str()
        .map(str::to_string)
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    let encrypted_content = payload.message["encrypted_content"]
        .as_str()
        .unwrap_or_default()
        .to_string();

    let record = MessageRecord {
        hashed_message_id: sha256_hex(&message_id),
        message_id,
        hashed_chat_id: sha256_hex(&payload.chat_id),
        hashed_user_id: ctx.user_id_hash.clone(),
        role: MessageRole::System,
        encrypted_content,
        status: None,
        created_at: now,
    };
    state.durable.insert_message(&record).await?;
    state
        .cache
        .increment_chat_component_version(&payload.chat_id, ChatComponent::Messages, now)
        .await;

    ctx.notify_siblings(ServerEvent::NewSystemMessage {
        chat_id: payload.chat_id,
        message: payload.message,
    })
    .await;
    Ok(())
}

/// Metadata-only page of older chats; messages load when a chat opens.
pub async fn handle_load_more_chats(
    ctx: &EventContext,
    payload: LoadMoreChatsPayload,
) -> Result<()> {
    let page = load_more_chats(
        &ctx.state.cache,
        &ctx.state.durable,
        &ctx.user_id_hash,
        payload.offset,
        payload.limit,
    )
    .await?;

    let chats = page.chats.into_iter().map(to_list_item).collect();
    ctx.reply(ServerEvent::LoadMoreChatsResponse(LoadMoreChatsResponse {
        chats,
        has_more: page.has_more,
        total_count: page.total_count,
        offset: page.offset,
    }))
    .await;
    Ok(())
}

pub async fn handle_delete_new_chat_suggestion(
    ctx: &EventContext,
    payload: DeleteNewChatSuggestionPayload,
) -> Result<()> {
    let removed = ctx
        .state
        .durable
        .delete_chat_suggestion(&ctx.user_id_hash, &payload.suggestion_id)
        .await?;
    if !removed {
        debug!(suggestion_id = %payload.suggestion_id, "suggestion already gone");
    }
    Ok(())
}

fn to_list_item(chat: ChatRecord) -> ChatListItem {
    ChatListItem {
        chat_id: chat.chat_id,
        encrypted_title: chat.encrypted_title,
        encrypted_category: chat.encrypted_category,
        encrypted_summary: chat.encrypted_summary,
        last_message_timestamp: chat.last_message_timestamp,
        pinned: chat.pinned,
        versions: serde_json::to_value(&chat.versions).unwrap_or(serde_json::Value::Null),
    }
}

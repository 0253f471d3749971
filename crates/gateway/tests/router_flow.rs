//! Router flows end to end against in-memory backends: ownership guards,
//! the cache-first commit order, task enqueueing, and cancel semantics.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use veil_billing::{ChargeLedger, UsageArchiver};
use veil_blob::{MemoryObjectStore, ObjectStore};
use veil_common::sha256_hex;
use veil_gateway::{ConnectionManager, GatewayState, router};
use veil_protocol::{
    CancelAiTaskPayload, ClientEvent, FocusModeRejectedPayload, LoadMoreChatsPayload,
    MessageReceivedPayload, StoreEmbedPayload,
};
use veil_skills::{NeverCancelled, SkillFabric, SkillRegistry};
use veil_store::{CacheTier, DurableStore, MemoryStore, types::TaskState, types::UserProfile};
use veil_tasks::{TaskQueue, UserEventBus, queue::QUEUE_APP_AI};
use veil_vault::TransitVault;

struct Harness {
    state: Arc<GatewayState>,
    ask_queue: tokio::sync::mpsc::UnboundedReceiver<veil_tasks::AskTaskRequest>,
}

async fn harness() -> Harness {
    let cache = Arc::new(CacheTier::new());
    let durable: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
    let vault = Arc::new(TransitVault::new());
    vault.create_key("vk-alice").await;
    durable
        .upsert_profile(&UserProfile {
            user_id_hash: sha256_hex("alice"),
            vault_key_id: "vk-alice".into(),
            email_notifications_enabled: false,
            encrypted_notification_email: None,
            notification_preferences: serde_json::Value::Null,
        })
        .await
        .unwrap();

    let blob: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
    let ledger = Arc::new(ChargeLedger::new(true));
    let archiver = Arc::new(UsageArchiver::new(
        Arc::clone(&durable),
        Arc::clone(&blob),
        Arc::clone(&vault),
        "usage-archives",
    ));
    let skills = Arc::new(SkillRegistry::new(false));
    let fabric = Arc::new(SkillFabric::new(Arc::clone(&skills), Arc::new(NeverCancelled)));
    let queue = TaskQueue::new();
    let ask_queue = queue.create(QUEUE_APP_AI).await;
    let (events, _events_rx) = UserEventBus::channel();

    let state = Arc::new(GatewayState::new(
        ConnectionManager::new(),
        cache,
        durable,
        vault,
        skills,
        fabric,
        queue,
        events,
        ledger,
        archiver,
        blob,
        "chatfiles-development",
        "secret-token",
    ));
    Harness { state, ask_queue }
}

fn ctx_for(state: &Arc<GatewayState>, user_id: &str, device: &str) -> router::EventContext {
    router::EventContext {
        state: Arc::clone(state),
        user_id: user_id.to_string(),
        user_id_hash: sha256_hex(user_id),
        device_hash: device.to_string(),
    }
}

fn message_payload(chat_id: &str, message_id: &str, content: &str) -> MessageReceivedPayload {
    MessageReceivedPayload {
        chat_id: chat_id.into(),
        message_id: message_id.into(),
        encrypted_content: format!("client-ct:{content}"),
        content: content.into(),
        mate_id: None,
        chat_has_title: false,
        is_incognito: false,
        preselected_skills: None,
    }
}

#[tokio::test]
async fn message_received_commits_cache_then_enqueues() {
    let mut h = harness().await;
    let ctx = ctx_for(&h.state, "alice", "d1");

    router::dispatch(
        &ctx,
        ClientEvent::MessageReceived(message_payload("chat-1", "m1", "hello there")),
    )
    .await;

    // Chat bound to the owner with the message counter bumped.
    let chat = h.state.cache.get_chat("chat-1").await.unwrap();
    assert_eq!(chat.hashed_user_id, sha256_hex("alice"));
    assert_eq!(chat.versions.messages_v, 1);

    // Inference copy wrapped, never plaintext.
    let history = h.state.cache.get_ai_messages_history("chat-1").await;
    assert_eq!(history.len(), 1);
    assert!(history[0].wrapped_content.starts_with("vault:v1:"));
    assert!(!history[0].wrapped_content.contains("hello there"));

    // Durable row carries only the client ciphertext.
    let rows = h
        .state
        .durable
        .get_messages(&sha256_hex("chat-1"))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].encrypted_content, "client-ct:hello there");

    // The ask task landed on the queue in queued state.
    let task = h.ask_queue.recv().await.unwrap();
    assert_eq!(task.chat_id, "chat-1");
    assert_eq!(
        h.state.cache.get_task_state(&task.task_id).await,
        Some(TaskState::Queued)
    );
}

#[tokio::test]
async fn foreign_user_cannot_write_into_chat() {
    let mut h = harness().await;
    let alice = ctx_for(&h.state, "alice", "d1");
    router::dispatch(
        &alice,
        ClientEvent::MessageReceived(message_payload("chat-1", "m1", "mine")),
    )
    .await;
    let _ = h.ask_queue.recv().await.unwrap();

    // Mallory needs a profile to get past key resolution — ownership
    // must fail first regardless.
    let mallory = ctx_for(&h.state, "mallory", "d9");
    let (_socket, mut rx) = h.state.connections.connect("mallory", "d9").await;
    router::dispatch(
        &mallory,
        ClientEvent::MessageReceived(message_payload("chat-1", "m2", "stolen")),
    )
    .await;

    // No second message landed, and the intruder got an error frame.
    let rows = h
        .state
        .durable
        .get_messages(&sha256_hex("chat-1"))
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    let frame = rx.recv().await.unwrap();
    assert!(frame.contains("\"error\""));
    assert!(h.ask_queue.try_recv().is_err());
}

#[tokio::test]
async fn cancel_ai_task_sets_flag_and_acks_requesting_device() {
    let mut h = harness().await;
    let ctx = ctx_for(&h.state, "alice", "d1");
    router::dispatch(
        &ctx,
        ClientEvent::MessageReceived(message_payload("chat-1", "m1", "go")),
    )
    .await;
    let task = h.ask_queue.recv().await.unwrap();

    let (_socket, mut rx) = h.state.connections.connect("alice", "d1").await;
    router::dispatch(
        &ctx,
        ClientEvent::CancelAiTask(CancelAiTaskPayload {
            task_id: task.task_id.clone(),
            chat_id: "chat-1".into(),
        }),
    )
    .await;

    assert!(h.state.cache.is_task_revoked(&task.task_id).await);
    assert!(h.state.cache.get_active_ai_task("chat-1").await.is_none());

    let frame = rx.recv().await.unwrap();
    assert!(frame.contains("ai_task_cancel_requested"));
    assert!(frame.contains("revocation_sent"));
}

#[tokio::test]
async fn focus_rejection_without_pending_falls_back_to_deactivation() {
    let h = harness().await;
    let ctx = ctx_for(&h.state, "alice", "d1");
    let (_socket, mut rx) = h.state.connections.connect("alice", "d1").await;

    router::dispatch(
        &ctx,
        ClientEvent::FocusModeRejected(FocusModeRejectedPayload {
            chat_id: "chat-1".into(),
            focus_id: "deep-research".into(),
        }),
    )
    .await;

    let frame = rx.recv().await.unwrap();
    assert!(frame.contains("focus_mode_rejected_ack"));
    assert!(frame.contains("\"caught_before_activation\":false"));
}

#[tokio::test]
async fn store_embed_is_upsert_and_status_is_one_way() {
    let h = harness().await;
    let ctx = ctx_for(&h.state, "alice", "d1");

    let mut payload = StoreEmbedPayload {
        embed_id: "e1".into(),
        r#type: Some("image".into()),
        encrypted_content: "ct1".into(),
        hashed_user_id: sha256_hex("alice"),
        hashed_chat_id: Some(sha256_hex("chat-1")),
        hashed_message_id: None,
        encryption_mode: Some("client".into()),
        share_mode: None,
        status: Some("finished".into()),
        embed_ids: None,
        parent_embed_id: None,
        version_number: None,
        file_path: None,
        content_hash: None,
        text_length_chars: None,
        is_private: None,
        is_shared: None,
        created_at: 10,
        updated_at: 10,
    };

    router::dispatch(&ctx, ClientEvent::StoreEmbed(payload.clone())).await;
    router::dispatch(&ctx, ClientEvent::StoreEmbed(payload.clone())).await;

    // Upsert law: two identical calls, one record.
    let embed = h.state.durable.get_embed("e1").await.unwrap().unwrap();
    assert_eq!(embed.encrypted_content, "ct1");

    // A backwards status write is ignored.
    payload.status = Some("in_progress".into());
    payload.encrypted_content = "ct2".into();
    router::dispatch(&ctx, ClientEvent::StoreEmbed(payload)).await;
    let embed = h.state.cache.get_embed("e1").await.unwrap();
    assert_eq!(embed.status, veil_store::types::EmbedStatus::Finished);
    assert_eq!(embed.encrypted_content, "ct2");
}

#[tokio::test]
async fn load_more_chats_pages_metadata_to_requesting_device() {
    let mut h = harness().await;
    let ctx = ctx_for(&h.state, "alice", "d1");
    for i in 0..3 {
        router::dispatch(
            &ctx,
            ClientEvent::MessageReceived(message_payload(&format!("chat-{i}"), &format!("m{i}"), "x")),
        )
        .await;
        let _ = h.ask_queue.recv().await.unwrap();
    }

    let (_socket, mut rx) = h.state.connections.connect("alice", "d1").await;
    router::dispatch(
        &ctx,
        ClientEvent::LoadMoreChats(LoadMoreChatsPayload {
            offset: 0,
            limit: 2,
        }),
    )
    .await;

    let frame = rx.recv().await.unwrap();
    assert!(frame.contains("load_more_chats_response"));
    assert!(frame.contains("\"total_count\":3"));
    assert!(frame.contains("\"has_more\":true"));
}

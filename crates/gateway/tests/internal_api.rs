//! Internal API surface: token guard, charge passthrough, and the
//! stale-object dedup check.

#![allow(clippy::unwrap_used)]

use std::sync::Arc;

use {
    axum::{
        Json,
        extract::State,
        http::{HeaderMap, HeaderValue, StatusCode},
        response::Response,
    },
    serde_json::json,
};

use veil_billing::{ChargeLedger, ChargeRequest, UsageArchiver};
use veil_blob::{MemoryObjectStore, ObjectStore};
use veil_gateway::{ConnectionManager, GatewayState, routes_internal};
use veil_protocol::INTERNAL_TOKEN_HEADER;
use veil_skills::{NeverCancelled, SkillFabric, SkillRegistry};
use veil_store::{
    CacheTier, DurableStore, MemoryStore,
    types::{EmbedRecord, EmbedStatus, EncryptionMode},
};
use veil_tasks::{TaskQueue, UserEventBus};
use veil_vault::TransitVault;

async fn state() -> Arc<GatewayState> {
    let cache = Arc::new(CacheTier::new());
    let durable: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
    let vault = Arc::new(TransitVault::new());
    vault.create_key("vk-1").await;
    let blob: Arc<dyn ObjectStore> = Arc::new(MemoryObjectStore::new());
    let ledger = Arc::new(ChargeLedger::new(true));
    ledger.credit("uh1", 10).await;
    let archiver = Arc::new(UsageArchiver::new(
        Arc::clone(&durable),
        Arc::clone(&blob),
        Arc::clone(&vault),
        "usage-archives",
    ));
    let skills = Arc::new(SkillRegistry::new(false));
    let fabric = Arc::new(SkillFabric::new(Arc::clone(&skills), Arc::new(NeverCancelled)));
    let (events, _rx) = UserEventBus::channel();

    Arc::new(GatewayState::new(
        ConnectionManager::new(),
        cache,
        durable,
        vault,
        skills,
        fabric,
        TaskQueue::new(),
        events,
        ledger,
        archiver,
        blob,
        "chatfiles-development",
        "secret-token",
    ))
}

fn headers(token: &str) -> HeaderMap {
    let mut map = HeaderMap::new();
    map.insert(INTERNAL_TOKEN_HEADER, HeaderValue::from_str(token).unwrap());
    map
}

async fn body_json(response: Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn upload_record(embed_id: &str, file_path: &str) -> EmbedRecord {
    EmbedRecord {
        hashed_embed_id: format!("h-{embed_id}"),
        embed_id: embed_id.into(),
        encryption_mode: EncryptionMode::Vault,
        encrypted_content: String::new(),
        hashed_user_id: "uh1".into(),
        hashed_chat_id: None,
        hashed_message_id: None,
        r#type: Some("image".into()),
        share_mode: None,
        parent_embed_id: None,
        child_embed_ids: Vec::new(),
        version_number: None,
        file_path: Some(file_path.into()),
        content_hash: Some("ch1".into()),
        status: EmbedStatus::Finished,
        text_length_chars: None,
        created_at: 1,
        updated_at: 1,
    }
}

#[tokio::test]
async fn wrong_token_is_rejected() {
    let state = state().await;
    let response = routes_internal::billing_charge(
        State(state),
        headers("wrong"),
        Json(ChargeRequest {
            user_id_hash: "uh1".into(),
            app_id: "a".into(),
            skill_id: "s".into(),
            credits: 1,
            idempotency_key: None,
            chat_id: None,
            message_id: None,
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn charge_beyond_balance_is_402() {
    let state = state().await;
    let response = routes_internal::billing_charge(
        State(Arc::clone(&state)),
        headers("secret-token"),
        Json(ChargeRequest {
            user_id_hash: "uh1".into(),
            app_id: "uploads".into(),
            skill_id: "pdf".into(),
            credits: 999,
            idempotency_key: None,
            chat_id: None,
            message_id: None,
        }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::PAYMENT_REQUIRED);

    // Nothing was debited.
    assert_eq!(state.ledger.balance("uh1").await, 10);
}

#[tokio::test]
async fn dedup_with_live_object_returns_record() {
    let state = state().await;
    state
        .blob
        .put("chatfiles-development", "uh1/ch1/1_full.bin", vec![1])
        .await
        .unwrap();
    state
        .durable
        .upsert_embed(&upload_record("e1", "uh1/ch1/1_full.bin"))
        .await
        .unwrap();

    let response = routes_internal::uploads_check_duplicate(
        State(state),
        headers("secret-token"),
        Json(serde_json::from_value(json!({
            "hashed_user_id": "uh1",
            "content_hash": "ch1",
        }))
        .unwrap()),
    )
    .await;
    let body = body_json(response).await;
    assert_eq!(body["exists"], true);
    assert_eq!(body["embed"]["embed_id"], "e1");
}

#[tokio::test]
async fn dedup_with_stale_object_discards_record() {
    let state = state().await;
    // Record exists, object does not (deleted out of band).
    state
        .durable
        .upsert_embed(&upload_record("e1", "uh1/ch1/1_full.bin"))
        .await
        .unwrap();

    let response = routes_internal::uploads_check_duplicate(
        State(Arc::clone(&state)),
        headers("secret-token"),
        Json(serde_json::from_value(json!({
            "hashed_user_id": "uh1",
            "content_hash": "ch1",
        }))
        .unwrap()),
    )
    .await;
    let body = body_json(response).await;
    assert_eq!(body["exists"], false);

    // The stale record is gone, so the full pipeline re-runs.
    assert!(state.durable.get_embed("e1").await.unwrap().is_none());
}

#[tokio::test]
async fn wrap_key_round_trips_through_transit() {
    let state = state().await;
    let key_b64 = {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD.encode([7u8; 32])
    };
    let response = routes_internal::uploads_wrap_key(
        State(Arc::clone(&state)),
        headers("secret-token"),
        Json(serde_json::from_value(json!({
            "aes_key_b64": key_b64,
            "vault_key_id": "vk-1",
        }))
        .unwrap()),
    )
    .await;
    let body = body_json(response).await;
    let wrapped = body["vault_wrapped_aes_key"].as_str().unwrap();
    assert!(wrapped.starts_with("vault:v1:"));

    let unwrapped = state.vault.unwrap("vk-1", wrapped).await.unwrap();
    assert_eq!(unwrapped, vec![7u8; 32]);
}

#[tokio::test]
async fn validate_token_resolves_registered_sessions() {
    let state = state().await;
    state
        .register_session("rt-1", veil_gateway::state::SessionIdentity {
            user_id: "u1".into(),
            user_id_hash: "uh1".into(),
            vault_key_id: "vk-1".into(),
        })
        .await;

    let ok = routes_internal::validate_token(
        State(Arc::clone(&state)),
        headers("secret-token"),
        Json(serde_json::from_value(json!({ "refresh_token": "rt-1" })).unwrap()),
    )
    .await;
    assert_eq!(ok.status(), StatusCode::OK);

    let missing = routes_internal::validate_token(
        State(state),
        headers("secret-token"),
        Json(serde_json::from_value(json!({ "refresh_token": "nope" })).unwrap()),
    )
    .await;
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);
}

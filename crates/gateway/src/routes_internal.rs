//! Narrow internal API, shared-secret guarded.
//!
//! The upload service (and peer microservices) reach the core only
//! through these endpoints; they never touch the main data store or the
//! transit vault directly. That keeps a compromised peer's blast radius
//! to what this surface exposes.

use std::sync::Arc;

use {
    axum::{
        Json,
        extract::State,
        http::{HeaderMap, StatusCode},
        response::{IntoResponse, Response},
    },
    base64::Engine,
    serde::{Deserialize, Serialize},
    tracing::{info, warn},
};

use veil_billing::{BillingError, ChargeRequest};
use veil_protocol::INTERNAL_TOKEN_HEADER;
use veil_store::types::EmbedRecord;

use crate::state::GatewayState;

fn authorized(state: &GatewayState, headers: &HeaderMap) -> bool {
    headers
        .get(INTERNAL_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|token| token == state.internal_token)
}

fn forbidden() -> Response {
    (
        StatusCode::UNAUTHORIZED,
        Json(serde_json::json!({ "message": "invalid internal token" })),
    )
        .into_response()
}

// ── Billing ──────────────────────────────────────────────────────────────────

/// `POST /internal/billing/charge`
pub async fn billing_charge(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(request): Json<ChargeRequest>,
) -> Response {
    if !authorized(&state, &headers) {
        return forbidden();
    }
    match state.ledger.charge(&request).await {
        Ok(outcome) => (
            StatusCode::OK,
            Json(serde_json::json!({ "status": outcome })),
        )
            .into_response(),
        Err(BillingError::InsufficientCredits { needed, available }) => (
            StatusCode::PAYMENT_REQUIRED,
            Json(serde_json::json!({
                "message": "Insufficient credits",
                "needed": needed,
                "available": available,
            })),
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "charge failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "message": "charge failed" })),
            )
                .into_response()
        },
    }
}

// ── Token validation ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct ValidateTokenRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct ValidateTokenResponse {
    pub user_id: String,
    pub user_id_hash: String,
    pub vault_key_id: String,
}

/// `POST /internal/validate-token` — the upload service forwards the
/// client's refresh-token cookie here to learn who it is serving.
pub async fn validate_token(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(request): Json<ValidateTokenRequest>,
) -> Response {
    if !authorized(&state, &headers) {
        return forbidden();
    }
    match state.validate_session(&request.refresh_token).await {
        Some(identity) => (
            StatusCode::OK,
            Json(ValidateTokenResponse {
                user_id: identity.user_id,
                user_id_hash: identity.user_id_hash,
                vault_key_id: identity.vault_key_id,
            }),
        )
            .into_response(),
        None => (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "message": "invalid token" })),
        )
            .into_response(),
    }
}

// ── Upload support ───────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct CheckDuplicateRequest {
    pub hashed_user_id: String,
    pub content_hash: String,
}

#[derive(Debug, Serialize)]
pub struct CheckDuplicateResponse {
    pub exists: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embed: Option<EmbedRecord>,
}

/// `POST /internal/uploads/check-duplicate` — a record only counts as a
/// duplicate while its stored object still exists; a stale record is
/// discarded so the pipeline re-runs.
pub async fn uploads_check_duplicate(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(request): Json<CheckDuplicateRequest>,
) -> Response {
    if !authorized(&state, &headers) {
        return forbidden();
    }

    let found = match state
        .durable
        .find_embed_by_content_hash(&request.hashed_user_id, &request.content_hash)
        .await
    {
        Ok(found) => found,
        Err(e) => {
            warn!(error = %e, "duplicate lookup failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "message": "lookup failed" })),
            )
                .into_response();
        },
    };

    let Some(embed) = found else {
        return (
            StatusCode::OK,
            Json(CheckDuplicateResponse {
                exists: false,
                embed: None,
            }),
        )
            .into_response();
    };

    let object_alive = match &embed.file_path {
        Some(key) => state
            .blob
            .exists(&state.chatfiles_bucket, key)
            .await
            .unwrap_or(false),
        None => false,
    };

    if !object_alive {
        info!(embed_id = %embed.embed_id, "dedup record stale (object gone), discarding");
        if let Err(e) = state.durable.delete_embed(&embed.embed_id).await {
            warn!(error = %e, "failed to discard stale dedup record");
        }
        return (
            StatusCode::OK,
            Json(CheckDuplicateResponse {
                exists: false,
                embed: None,
            }),
        )
            .into_response();
    }

    (
        StatusCode::OK,
        Json(CheckDuplicateResponse {
            exists: true,
            embed: Some(embed),
        }),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct WrapKeyRequest {
    pub aes_key_b64: String,
    pub vault_key_id: String,
}

#[derive(Debug, Serialize)]
pub struct WrapKeyResponse {
    pub vault_wrapped_aes_key: String,
}

/// `POST /internal/uploads/wrap-key` — transit-wrap an upload's AES key.
/// The upload service keeps no decryption capability for past files.
pub async fn uploads_wrap_key(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(request): Json<WrapKeyRequest>,
) -> Response {
    if !authorized(&state, &headers) {
        return forbidden();
    }
    let Ok(key_bytes) =
        base64::engine::general_purpose::STANDARD.decode(&request.aes_key_b64)
    else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "message": "aes_key_b64 is not base64" })),
        )
            .into_response();
    };
    match state.vault.wrap(&request.vault_key_id, &key_bytes).await {
        Ok(wrapped) => (
            StatusCode::OK,
            Json(WrapKeyResponse {
                vault_wrapped_aes_key: wrapped,
            }),
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "wrap-key failed");
            (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(serde_json::json!({ "message": "unknown vault key" })),
            )
                .into_response()
        },
    }
}

/// `POST /internal/uploads/store-record`
pub async fn uploads_store_record(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(record): Json<EmbedRecord>,
) -> Response {
    if !authorized(&state, &headers) {
        return forbidden();
    }
    if let Err(e) = state.durable.upsert_embed(&record).await {
        warn!(error = %e, "store-record failed");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "message": "store failed" })),
        )
            .into_response();
    }
    (StatusCode::OK, Json(serde_json::json!({ "status": "stored" }))).into_response()
}

#[derive(Debug, Deserialize)]
pub struct PdfProcessRequest {
    pub embed_id: String,
    #[serde(default)]
    pub pages: Option<usize>,
}

/// `POST /internal/pdf/process` — fire-and-forget OCR trigger. The
/// processing pipeline is external; we acknowledge and move on.
pub async fn pdf_process(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(request): Json<PdfProcessRequest>,
) -> Response {
    if !authorized(&state, &headers) {
        return forbidden();
    }
    info!(embed_id = %request.embed_id, pages = ?request.pages, "pdf processing triggered");
    (StatusCode::ACCEPTED, Json(serde_json::json!({ "status": "queued" }))).into_response()
}

//! Gateway app assembly.

use std::sync::Arc;

use {
    axum::{
        Router,
        extract::{Query, State, WebSocketUpgrade},
        http::StatusCode,
        response::{IntoResponse, Response},
        routing::{get, post},
    },
    serde::Deserialize,
    tracing::info,
};

use crate::{routes_embeds, routes_internal, routes_skills, state::GatewayState, ws};

#[derive(Debug, Deserialize)]
struct WsQuery {
    user_id: String,
    device_fingerprint_hash: String,
}

async fn ws_upgrade(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<WsQuery>,
    upgrade: WebSocketUpgrade,
) -> Response {
    upgrade.on_upgrade(move |socket| {
        ws::handle_connection(socket, state, query.user_id, query.device_fingerprint_hash)
    })
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Build the gateway router: WS endpoint, embed REST endpoints, and the
/// internal API.
pub fn build_app(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/ws", get(ws_upgrade))
        .route("/v1/embeds/{embed_id}/file", get(routes_embeds::embed_file))
        .route(
            "/v1/embeds/{embed_id}/content",
            get(routes_embeds::embed_content),
        )
        .route("/internal/billing/charge", post(routes_internal::billing_charge))
        .route("/internal/validate-token", post(routes_internal::validate_token))
        .route(
            "/internal/uploads/check-duplicate",
            post(routes_internal::uploads_check_duplicate),
        )
        .route(
            "/internal/uploads/wrap-key",
            post(routes_internal::uploads_wrap_key),
        )
        .route(
            "/internal/uploads/store-record",
            post(routes_internal::uploads_store_record),
        )
        .route("/internal/pdf/process", post(routes_internal::pdf_process))
        .route("/skills/{skill_key}", post(routes_skills::invoke_skill))
        .route("/metadata", get(routes_skills::metadata))
        .with_state(state)
}

/// Bind and serve until shutdown.
pub async fn serve(state: Arc<GatewayState>, bind: &str) -> std::io::Result<()> {
    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(bind, "gateway listening");
    axum::serve(listener, app).await
}

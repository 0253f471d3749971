//! Upload service HTTP surface.

use std::sync::Arc;

use {
    axum::{
        Json, Router,
        body::Bytes,
        extract::{DefaultBodyLimit, State},
        http::{HeaderMap, StatusCode},
        response::{IntoResponse, Response},
        routing::{get, post},
    },
    tracing::{info, warn},
};

use veil_protocol::MAX_UPLOAD_BYTES;

use crate::pipeline::UploadService;

/// Refresh token as forwarded in the cookie header.
fn refresh_token(headers: &HeaderMap) -> Option<String> {
    let cookies = headers.get("cookie")?.to_str().ok()?;
    cookies.split(';').find_map(|cookie| {
        let (name, value) = cookie.trim().split_once('=')?;
        (name == "refresh_token").then(|| value.to_string())
    })
}

async fn upload(
    State(service): State<Arc<UploadService>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(token) = refresh_token(&headers) else {
        return (
            StatusCode::UNAUTHORIZED,
            Json(serde_json::json!({ "message": "missing refresh token" })),
        )
            .into_response();
    };
    let content_type = headers
        .get("content-type")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("application/octet-stream")
        .to_string();

    match service.process(&token, &content_type, body.to_vec()).await {
        Ok(response) => {
            info!(embed_id = %response.embed_id, deduplicated = response.deduplicated, "upload done");
            (StatusCode::OK, Json(response)).into_response()
        },
        Err(e) => {
            warn!(error = %e, "upload rejected");
            let status =
                StatusCode::from_u16(e.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            // Coarse user-visible text; details stay in the log.
            let message = match status {
                StatusCode::PAYMENT_REQUIRED => "Insufficient credits",
                StatusCode::PAYLOAD_TOO_LARGE => "File too large",
                StatusCode::UNSUPPORTED_MEDIA_TYPE => "Unsupported file type",
                StatusCode::UNPROCESSABLE_ENTITY => "File rejected",
                StatusCode::UNAUTHORIZED => "Not signed in",
                _ => "Upload failed",
            };
            (status, Json(serde_json::json!({ "message": message }))).into_response()
        },
    }
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Build the upload app. The body limit sits one byte above the
/// admission bound so the pipeline — not the framework — owns the
/// boundary semantics (exactly 100 MB is accepted).
pub fn build_app(service: Arc<UploadService>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/upload", post(upload))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES as usize + 1))
        .with_state(service)
}

/// Bind and serve until shutdown.
pub async fn serve(service: Arc<UploadService>, bind: &str) -> std::io::Result<()> {
    let app = build_app(service);
    let listener = tokio::net::TcpListener::bind(bind).await?;
    info!(bind, "upload service listening");
    axum::serve(listener, app).await
}

//! Skill invocation surface.
//!
//! Each registered skill is reachable at `/skills/{key}`; the fabric
//! parses the raw body against the request contract, injects the
//! whitelisted context fields, and runs the request array in parallel.
//! `/metadata` lists the callable skills.

use std::sync::Arc;

use {
    axum::{
        Json,
        extract::{Path, State},
        http::{HeaderMap, StatusCode},
        response::{IntoResponse, Response},
    },
    tracing::warn,
};

use veil_skills::{SkillError, SkillInvocation};

use crate::state::GatewayState;

/// `POST /skills/{key}` — invoke one skill with a `requests` array body.
pub async fn invoke_skill(
    State(state): State<Arc<GatewayState>>,
    Path(key): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let mut invocation: SkillInvocation = match serde_json::from_str(&body) {
        Ok(invocation) => invocation,
        Err(e) => {
            warn!(skill = %key, error = %e, "invalid skill request body");
            return (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "message": "invalid request body" })),
            )
                .into_response();
        },
    };

    // Requests arriving over HTTP are external by definition; the api key
    // name travels alongside when the edge resolved one.
    invocation.context.external_request = true;
    if invocation.context.api_key_name.is_none() {
        invocation.context.api_key_name = headers
            .get("x-api-key-name")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
    }

    match state.fabric.dispatch(&key, invocation).await {
        Ok(outcome) => (StatusCode::OK, Json(outcome)).into_response(),
        Err(SkillError::UnknownSkill(_)) => (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "message": "unknown skill" })),
        )
            .into_response(),
        Err(SkillError::InvalidRequest(message)) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "message": message })),
        )
            .into_response(),
        Err(e) => {
            warn!(skill = %key, error = %e, "skill invocation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "message": "skill failed" })),
            )
                .into_response()
        },
    }
}

/// `GET /metadata` — the callable skill keys.
pub async fn metadata(State(state): State<Arc<GatewayState>>) -> Response {
    (
        StatusCode::OK,
        Json(serde_json::json!({ "skills": state.skills.keys() })),
    )
        .into_response()
}

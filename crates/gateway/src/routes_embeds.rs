//! REST embed endpoints.
//!
//! Only vault-mode embeds can be served as plaintext: the server holds a
//! transit-wrapped copy of their key and decrypts on the owner's behalf.
//! Client-mode embeds are refused with a clear message — there is no key
//! to decrypt them with.

use std::sync::Arc;

use {
    axum::{
        body::Body,
        extract::{Path, Query, State},
        http::{HeaderMap, StatusCode, header},
        response::{IntoResponse, Response},
    },
    base64::Engine,
    serde::Deserialize,
    tracing::{debug, warn},
};

use veil_common::sha256_hex;
use veil_store::types::{EmbedRecord, EncryptionMode};
use veil_vault::aes256gcm;

use crate::state::GatewayState;

/// Decrypted layout of a vault-mode upload embed's content. Built by the
/// client from the upload service's response, shipped through the normal
/// `store_embed` flow, transit-wrapped.
#[derive(Debug, Deserialize)]
struct VaultEmbedContent {
    aes_key: String,
    aes_nonce: String,
    files: std::collections::HashMap<String, VariantRef>,
    #[serde(default)]
    prompt: Option<String>,
    #[serde(default)]
    extension: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VariantRef {
    s3_key: String,
}

#[derive(Debug, Deserialize)]
pub struct FileQuery {
    #[serde(default = "default_format")]
    format: String,
}

fn default_format() -> String {
    "full".into()
}

/// Identity as resolved by the auth layer in front of us.
fn caller_user_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-user-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, axum::Json(serde_json::json!({ "message": message }))).into_response()
}

async fn load_owned_embed(
    state: &GatewayState,
    embed_id: &str,
    user_id_hash: &str,
) -> Result<EmbedRecord, Response> {
    let embed = match state.cache.get_embed(embed_id).await {
        Some(embed) => embed,
        None => match state.durable.get_embed(embed_id).await {
            Ok(Some(embed)) => embed,
            Ok(None) => return Err(error_response(StatusCode::NOT_FOUND, "embed not found")),
            Err(e) => {
                warn!(embed_id, error = %e, "embed lookup failed");
                return Err(error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "lookup failed",
                ));
            },
        },
    };
    if embed.hashed_user_id != user_id_hash {
        return Err(error_response(StatusCode::UNAUTHORIZED, "not your embed"));
    }
    Ok(embed)
}

/// `GET /v1/embeds/{embed_id}/content` — decrypted content of a
/// vault-mode embed.
pub async fn embed_content(
    State(state): State<Arc<GatewayState>>,
    Path(embed_id): Path<String>,
    headers: HeaderMap,
) -> Response {
    let Some(user_id) = caller_user_id(&headers) else {
        return error_response(StatusCode::UNAUTHORIZED, "missing identity");
    };
    let user_id_hash = sha256_hex(&user_id);

    let embed = match load_owned_embed(&state, &embed_id, &user_id_hash).await {
        Ok(embed) => embed,
        Err(response) => return response,
    };
    if embed.encryption_mode != EncryptionMode::Vault {
        return error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            "client-encrypted embeds cannot be decrypted server-side",
        );
    }

    let vault_key_id = match resolve_vault_key(&state, &user_id, &user_id_hash).await {
        Ok(key) => key,
        Err(response) => return response,
    };
    match state.vault.unwrap_str(&vault_key_id, &embed.encrypted_content).await {
        Ok(content) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "application/json")],
            content,
        )
            .into_response(),
        Err(e) => {
            warn!(embed_id, error = %e, "embed content decrypt failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "decrypt failed")
        },
    }
}

/// `GET /v1/embeds/{embed_id}/file?format=preview|full|original` — the
/// decrypted file bytes of a vault-mode embed, served as an attachment.
pub async fn embed_file(
    State(state): State<Arc<GatewayState>>,
    Path(embed_id): Path<String>,
    Query(query): Query<FileQuery>,
    headers: HeaderMap,
) -> Response {
    let Some(user_id) = caller_user_id(&headers) else {
        return error_response(StatusCode::UNAUTHORIZED, "missing identity");
    };
    let user_id_hash = sha256_hex(&user_id);

    let embed = match load_owned_embed(&state, &embed_id, &user_id_hash).await {
        Ok(embed) => embed,
        Err(response) => return response,
    };
    if embed.encryption_mode != EncryptionMode::Vault {
        return error_response(
            StatusCode::UNPROCESSABLE_ENTITY,
            "client-encrypted embeds cannot be decrypted server-side",
        );
    }

    // 1. Transit-unwrap the embed content to reach the AES key inside.
    let vault_key_id = match resolve_vault_key(&state, &user_id, &user_id_hash).await {
        Ok(key) => key,
        Err(response) => return response,
    };
    let content_json = match state
        .vault
        .unwrap_str(&vault_key_id, &embed.encrypted_content)
        .await
    {
        Ok(json) => json,
        Err(e) => {
            warn!(embed_id, error = %e, "embed content decrypt failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "decrypt failed");
        },
    };
    let content: VaultEmbedContent = match serde_json::from_str(&content_json) {
        Ok(content) => content,
        Err(e) => {
            warn!(embed_id, error = %e, "embed content is not a file descriptor");
            return error_response(StatusCode::UNPROCESSABLE_ENTITY, "not a file embed");
        },
    };

    let Some(variant) = content.files.get(&query.format) else {
        return error_response(StatusCode::NOT_FOUND, "unknown format");
    };

    // 2. Decode the AES key + nonce carried inside the descriptor.
    let engine = base64::engine::general_purpose::STANDARD;
    let (Ok(key_bytes), Ok(nonce_bytes)) =
        (engine.decode(&content.aes_key), engine.decode(&content.aes_nonce))
    else {
        return error_response(StatusCode::UNPROCESSABLE_ENTITY, "malformed key material");
    };
    let (Ok(key), Ok(nonce)) = (
        <[u8; 32]>::try_from(key_bytes.as_slice()),
        <[u8; aes256gcm::NONCE_LEN]>::try_from(nonce_bytes.as_slice()),
    ) else {
        return error_response(StatusCode::UNPROCESSABLE_ENTITY, "malformed key material");
    };

    // 3. Fetch and decrypt the stored object.
    let encrypted = match state.blob.get(&state.chatfiles_bucket, &variant.s3_key).await {
        Ok(bytes) => bytes,
        Err(veil_blob::BlobError::NotFound { .. }) => {
            return error_response(StatusCode::NOT_FOUND, "file object missing");
        },
        Err(e) => {
            warn!(embed_id, error = %e, "file object fetch failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "fetch failed");
        },
    };
    let plaintext = match aes256gcm::decrypt_with_nonce(&key, &nonce, &encrypted, b"") {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!(embed_id, error = %e, "file decrypt failed");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "decrypt failed");
        },
    };

    let extension = content.extension.as_deref().unwrap_or("bin");
    let filename = content
        .prompt
        .as_deref()
        .map(|p| format!("{}.{extension}", slugify(p)))
        .unwrap_or_else(|| format!("veil_generated_file.{extension}"));

    debug!(embed_id, format = %query.format, bytes = plaintext.len(), "serving embed file");
    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        Body::from(plaintext),
    )
        .into_response()
}

async fn resolve_vault_key(
    state: &GatewayState,
    user_id: &str,
    user_id_hash: &str,
) -> Result<String, Response> {
    if let Some(key) = state.cache.get_user_vault_key_id(user_id).await {
        return Ok(key);
    }
    match state.durable.get_profile(user_id_hash).await {
        Ok(Some(profile)) => Ok(profile.vault_key_id),
        Ok(None) => Err(error_response(StatusCode::UNAUTHORIZED, "no profile")),
        Err(e) => {
            warn!(user = user_id_hash, error = %e, "profile lookup failed");
            Err(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "lookup failed",
            ))
        },
    }
}

/// Human-readable filename slug from a prompt.
fn slugify(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    for c in input.chars().take(60) {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
        } else if (c == ' ' || c == '-' || c == '_') && !slug.ends_with('_') {
            slug.push('_');
        }
    }
    let trimmed = slug.trim_matches('_');
    if trimmed.is_empty() {
        "file".to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_produces_safe_filenames() {
        assert_eq!(slugify("A sunset over the sea!"), "a_sunset_over_the_sea");
        assert_eq!(slugify("___"), "file");
        assert_eq!(slugify("multi   space"), "multi_space");
    }
}

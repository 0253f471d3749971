//! Embed lifecycle handlers: zero-knowledge storage, key wrappers, and
//! on-demand reads.

use tracing::{debug, warn};

use veil_common::{now_unix_secs, sha256_hex};
use veil_protocol::{
    EmbedData, RequestEmbedPayload, ServerEvent, StoreEmbedKeysPayload, StoreEmbedPayload,
};
use veil_store::{
    store_embed_keys,
    types::{EmbedKeyType, EmbedKeyWrapper, EmbedRecord, EmbedStatus, EncryptionMode},
};

use crate::{GatewayError, Result, router::EventContext};

fn parse_encryption_mode(raw: Option<&str>) -> EncryptionMode {
    match raw {
        Some("vault") => EncryptionMode::Vault,
        _ => EncryptionMode::Client,
    }
}

fn parse_status(raw: Option<&str>) -> EmbedStatus {
    match raw {
        Some("in_progress") => EmbedStatus::InProgress,
        Some("failed") => EmbedStatus::Failed,
        Some("cancelled") => EmbedStatus::Cancelled,
        _ => EmbedStatus::Finished,
    }
}

fn status_label(status: EmbedStatus) -> &'static str {
    match status {
        EmbedStatus::InProgress => "in_progress",
        EmbedStatus::Finished => "finished",
        EmbedStatus::Failed => "failed",
        EmbedStatus::Cancelled => "cancelled",
    }
}

/// Store (upsert) one client-encrypted embed. Two identical calls leave
/// exactly one record.
pub async fn handle_store_embed(ctx: &EventContext, payload: StoreEmbedPayload) -> Result<()> {
    if payload.hashed_user_id != ctx.user_id_hash {
        warn!(embed_id = %payload.embed_id, "store_embed with foreign hashed_user_id");
        return Err(GatewayError::Unauthorized);
    }
    let state = &ctx.state;

    let mut status = parse_status(payload.status.as_deref());
    // Status is one-way (except in_progress → cancelled); a replayed or
    // out-of-order upsert keeps the terminal status it already reached.
    if let Some(existing) = state.cache.get_embed(&payload.embed_id).await
        && !existing.status.can_transition_to(status)
    {
        warn!(
            embed_id = %payload.embed_id,
            from = ?existing.status,
            to = ?status,
            "rejecting backwards embed status transition"
        );
        status = existing.status;
    }

    let record = EmbedRecord {
        hashed_embed_id: sha256_hex(&payload.embed_id),
        embed_id: payload.embed_id.clone(),
        encryption_mode: parse_encryption_mode(payload.encryption_mode.as_deref()),
        encrypted_content: payload.encrypted_content,
        hashed_user_id: payload.hashed_user_id,
        hashed_chat_id: payload.hashed_chat_id,
        hashed_message_id: payload.hashed_message_id,
        r#type: payload.r#type,
        share_mode: payload.share_mode,
        parent_embed_id: payload.parent_embed_id,
        child_embed_ids: payload.embed_ids.clone().unwrap_or_default(),
        version_number: payload.version_number,
        file_path: payload.file_path,
        content_hash: payload.content_hash,
        status,
        text_length_chars: payload.text_length_chars,
        created_at: payload.created_at,
        updated_at: payload.updated_at,
    };

    state.cache.upsert_embed(record.clone()).await;
    state.durable.upsert_embed(&record).await?;

    ctx.notify_siblings(ServerEvent::EmbedUpdate {
        embed_id: record.embed_id,
        status: status_label(record.status).into(),
        child_embed_ids: record.child_embed_ids,
    })
    .await;
    Ok(())
}

/// Append client-supplied key wrappers. Elements are validated
/// individually; a bad wrapper never fails its siblings.
pub async fn handle_store_embed_keys(
    ctx: &EventContext,
    payload: StoreEmbedKeysPayload,
) -> Result<()> {
    let now = now_unix_secs() as i64;
    let mut wrappers = Vec::with_capacity(payload.keys.len());
    let mut rejected = 0usize;

    for key in payload.keys {
        if key.hashed_user_id != ctx.user_id_hash {
            warn!(embed = %key.hashed_embed_id, "embed key wrapper with foreign hashed_user_id");
            rejected += 1;
            continue;
        }
        let key_type = match key.key_type.as_str() {
            "master" => EmbedKeyType::Master,
            "chat" => EmbedKeyType::Chat,
            other => {
                warn!(key_type = other, "unrecognised embed key type");
                rejected += 1;
                continue;
            },
        };
        wrappers.push(EmbedKeyWrapper {
            hashed_embed_id: key.hashed_embed_id,
            key_type,
            hashed_chat_id: key.hashed_chat_id,
            encrypted_embed_key: key.encrypted_embed_key,
            hashed_user_id: key.hashed_user_id,
            created_at: key.created_at.unwrap_or(now),
        });
    }

    let outcome = store_embed_keys(&ctx.state.durable, wrappers).await?;
    debug!(
        stored = outcome.stored,
        rejected = rejected + outcome.rejected.len(),
        "embed keys processed"
    );
    Ok(())
}

/// On-demand embed read. Vault-mode content is decrypted on the owner's
/// behalf; client-mode ciphertext is returned as-is.
pub async fn handle_request_embed(ctx: &EventContext, payload: RequestEmbedPayload) -> Result<()> {
    let state = &ctx.state;
    let embed = match state.cache.get_embed(&payload.embed_id).await {
        Some(embed) => embed,
        None => state
            .durable
            .get_embed(&payload.embed_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("embed {}", payload.embed_id)))?,
    };

    if embed.hashed_user_id != ctx.user_id_hash {
        return Err(GatewayError::Unauthorized);
    }

    let content = match embed.encryption_mode {
        EncryptionMode::Vault => {
            let vault_key_id = ctx.vault_key_id().await?;
            state
                .vault
                .unwrap_str(&vault_key_id, &embed.encrypted_content)
                .await?
        },
        EncryptionMode::Client => embed.encrypted_content.clone(),
    };

    ctx.reply(ServerEvent::SendEmbedData(Box::new(EmbedData {
        embed_id: embed.embed_id,
        r#type: embed.r#type,
        content,
        status: status_label(embed.status).into(),
        chat_id: embed.hashed_chat_id,
        message_id: embed.hashed_message_id,
        share_mode: embed.share_mode,
        created_at: embed.created_at,
        updated_at: embed.updated_at,
        embed_ids: (!embed.child_embed_ids.is_empty()).then_some(embed.child_embed_ids),
        task_id: None,
        parent_embed_id: embed.parent_embed_id,
        version_number: embed.version_number,
        file_path: embed.file_path,
        content_hash: embed.content_hash,
    })))
    .await;
    Ok(())
}

//! Embed key wrapping store.
//!
//! Embed bodies and embed keys are stored separately. Clients ship arrays
//! of wrappers; each wrapper is validated on its own and bad elements are
//! rejected individually — the request as a whole never fails. Clients
//! deduplicate, so the server appends without checking for duplicates.

use std::sync::Arc;

use serde::Serialize;
use tracing::warn;

use crate::{
    Result,
    durable::DurableStore,
    types::{EmbedKeyType, EmbedKeyWrapper},
};

/// Per-wrapper outcome returned to the client.
#[derive(Debug, Clone, Serialize)]
pub struct RejectedKey {
    pub index: usize,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreEmbedKeysOutcome {
    pub stored: usize,
    pub rejected: Vec<RejectedKey>,
}

fn validate(wrapper: &EmbedKeyWrapper) -> Option<String> {
    if wrapper.hashed_embed_id.is_empty() {
        return Some("missing hashed_embed_id".into());
    }
    if wrapper.encrypted_embed_key.is_empty() {
        return Some("missing encrypted_embed_key".into());
    }
    if wrapper.hashed_user_id.is_empty() {
        return Some("missing hashed_user_id".into());
    }
    if wrapper.key_type == EmbedKeyType::Chat && wrapper.hashed_chat_id.is_none() {
        return Some("key_type=chat requires hashed_chat_id".into());
    }
    None
}

/// Append each valid wrapper; collect rejections for the rest.
pub async fn store_embed_keys(
    durable: &Arc<dyn DurableStore>,
    wrappers: Vec<EmbedKeyWrapper>,
) -> Result<StoreEmbedKeysOutcome> {
    let mut stored = 0usize;
    let mut rejected = Vec::new();

    for (index, wrapper) in wrappers.into_iter().enumerate() {
        if let Some(reason) = validate(&wrapper) {
            warn!(index, %reason, "rejecting embed key wrapper");
            rejected.push(RejectedKey { index, reason });
            continue;
        }
        durable.append_embed_key(&wrapper).await?;
        stored += 1;
    }

    Ok(StoreEmbedKeysOutcome { stored, rejected })
}

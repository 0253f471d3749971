//! Monthly usage archival.
//!
//! After three months, a user's usage entries for a month are serialized,
//! gzipped, encrypted under the user's transit key, and uploaded at
//! `usage-archives/{user_id_hash}/{YYYY-MM}/usage.json.gz`; the monthly
//! summary rows get `is_archived=true` plus the object key, and only then
//! do the hot rows go away. Retrieval reverses the pipeline and decrypts
//! the per-entry numeric fields for display.

use std::{
    io::{Read, Write},
    sync::Arc,
};

use {
    base64::Engine,
    flate2::{Compression, read::GzDecoder, write::GzEncoder},
    serde::{Deserialize, Serialize},
    tracing::{error, info, warn},
};

use veil_blob::ObjectStore;
use veil_store::{
    DurableStore,
    types::{SummaryKind, UsageEntry},
};
use veil_vault::TransitVault;

use crate::{BillingError, Result, month::month_window};

/// On-object archive layout.
#[derive(Debug, Serialize, Deserialize)]
struct ArchiveDocument {
    user_id_hash: String,
    year_month: String,
    archived_at: i64,
    entry_count: usize,
    entries: Vec<UsageEntry>,
}

/// Filters applied after download during retrieval.
#[derive(Debug, Clone, Default)]
pub struct ArchiveFilters {
    pub chat_id: Option<String>,
    pub app_id: Option<String>,
    pub skill_id: Option<String>,
}

impl ArchiveFilters {
    fn matches(&self, entry: &UsageEntry) -> bool {
        if let Some(chat_id) = &self.chat_id
            && entry.chat_id.as_deref() != Some(chat_id.as_str())
        {
            return false;
        }
        if let Some(app_id) = &self.app_id
            && entry.app_id != *app_id
        {
            return false;
        }
        if let Some(skill_id) = &self.skill_id
            && entry.skill_id != *skill_id
        {
            return false;
        }
        true
    }
}

/// A usage entry with its numeric fields decrypted for display.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecryptedUsageEntry {
    pub id: String,
    pub app_id: String,
    pub skill_id: String,
    pub credits_costs_total: i64,
    pub model_used: String,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub created_at: i64,
    pub chat_id: Option<String>,
    pub message_id: Option<String>,
}

pub struct UsageArchiver {
    durable: Arc<dyn DurableStore>,
    blob: Arc<dyn ObjectStore>,
    vault: Arc<TransitVault>,
    bucket: String,
}

impl UsageArchiver {
    pub fn new(
        durable: Arc<dyn DurableStore>,
        blob: Arc<dyn ObjectStore>,
        vault: Arc<TransitVault>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            durable,
            blob,
            vault,
            bucket: bucket.into(),
        }
    }

    fn object_key(user_id_hash: &str, year_month: &str) -> String {
        format!("usage-archives/{user_id_hash}/{year_month}/usage.json.gz")
    }

    /// Archive one user's entries for one month. Returns the object key,
    /// or `None` when the user has no entries in that month.
    pub async fn archive_user_month(
        &self,
        user_id_hash: &str,
        year_month: &str,
        user_vault_key_id: &str,
        archived_at: i64,
    ) -> Result<Option<String>> {
        let (start_ts, end_ts) = month_window(year_month)?;
        let entries = self
            .durable
            .usage_entries_in_window(user_id_hash, start_ts, end_ts)
            .await?;

        if entries.is_empty() {
            info!(user = user_id_hash, year_month, "no usage entries to archive");
            return Ok(None);
        }

        let entry_ids: Vec<String> = entries.iter().map(|e| e.id.clone()).collect();
        let document = ArchiveDocument {
            user_id_hash: user_id_hash.to_string(),
            year_month: year_month.to_string(),
            archived_at,
            entry_count: entries.len(),
            entries,
        };

        // Serialize, compress, then encrypt — in that order, so the
        // ciphertext compresses nothing and leaks nothing.
        let json = serde_json::to_vec(&document)?;
        let compressed = gzip(&json)?;
        let compressed_b64 = base64::engine::general_purpose::STANDARD.encode(&compressed);
        let encrypted = self
            .vault
            .wrap_str(user_vault_key_id, &compressed_b64)
            .await?;

        let key = Self::object_key(user_id_hash, year_month);
        self.blob
            .put(&self.bucket, &key, encrypted.into_bytes())
            .await?;
        info!(user = user_id_hash, year_month, key = %key, "uploaded usage archive");

        // Flag summaries before deleting hot rows; a crash between the two
        // leaves recoverable duplicates, never data loss.
        for kind in SummaryKind::ALL {
            let summaries = self
                .durable
                .summaries_for_month(user_id_hash, year_month, kind)
                .await?;
            for summary in summaries {
                self.durable.mark_summary_archived(&summary.id, &key).await?;
            }
        }

        for id in &entry_ids {
            if let Err(e) = self.durable.delete_usage_entry(id).await {
                // Keep deleting the rest; a leftover row is re-archived
                // next run.
                error!(entry_id = %id, error = %e, "failed to delete archived usage entry");
            }
        }

        info!(
            user = user_id_hash,
            year_month,
            entries = entry_ids.len(),
            "archived usage entries"
        );
        Ok(Some(key))
    }

    /// The monthly task: archive every user with entries in the month that
    /// lies three whole months before `now`.
    pub async fn run_monthly(&self, now: i64) -> Result<usize> {
        let year_month = crate::month::cutoff_year_month(now, 3)?;
        let (start_ts, end_ts) = month_window(&year_month)?;
        let users = self.durable.usage_users_in_window(start_ts, end_ts).await?;

        let mut archived = 0usize;
        for user_id_hash in users {
            let Some(profile) = self.durable.get_profile(&user_id_hash).await? else {
                warn!(user = %user_id_hash, "no profile for usage archival, skipping");
                continue;
            };
            match self
                .archive_user_month(&user_id_hash, &year_month, &profile.vault_key_id, now)
                .await
            {
                Ok(Some(_)) => archived += 1,
                Ok(None) => {},
                Err(e) => {
                    error!(user = %user_id_hash, year_month, error = %e, "archival failed for user");
                },
            }
        }
        Ok(archived)
    }

    /// Download, decrypt, decompress, filter, and decrypt the per-entry
    /// fields of an archived month.
    pub async fn retrieve_archived_usage(
        &self,
        user_id_hash: &str,
        year_month: &str,
        user_vault_key_id: &str,
        filters: &ArchiveFilters,
    ) -> Result<Vec<DecryptedUsageEntry>> {
        let key = Self::object_key(user_id_hash, year_month);
        let encrypted = match self.blob.get(&self.bucket, &key).await {
            Ok(bytes) => bytes,
            Err(veil_blob::BlobError::NotFound { .. }) => {
                return Err(BillingError::ArchiveNotFound {
                    user_id_hash: user_id_hash.to_string(),
                    year_month: year_month.to_string(),
                });
            },
            Err(e) => return Err(e.into()),
        };

        let encrypted = String::from_utf8(encrypted)
            .map_err(|_| BillingError::Message("archive object is not utf-8".into()))?;
        let compressed_b64 = self.vault.unwrap_str(user_vault_key_id, &encrypted).await?;
        let compressed = base64::engine::general_purpose::STANDARD
            .decode(compressed_b64)
            .map_err(veil_vault::VaultError::from)?;
        let json = gunzip(&compressed)?;
        let document: ArchiveDocument = serde_json::from_slice(&json)?;

        let mut out = Vec::new();
        for entry in document.entries.into_iter().filter(|e| filters.matches(e)) {
            out.push(DecryptedUsageEntry {
                id: entry.id,
                app_id: entry.app_id,
                skill_id: entry.skill_id,
                credits_costs_total: self
                    .decrypt_i64(user_vault_key_id, &entry.encrypted_credits_costs_total)
                    .await,
                model_used: self
                    .vault
                    .unwrap_str(user_vault_key_id, &entry.encrypted_model_used)
                    .await
                    .unwrap_or_default(),
                input_tokens: self
                    .decrypt_i64(user_vault_key_id, &entry.encrypted_input_tokens)
                    .await,
                output_tokens: self
                    .decrypt_i64(user_vault_key_id, &entry.encrypted_output_tokens)
                    .await,
                created_at: entry.created_at,
                chat_id: entry.chat_id,
                message_id: entry.message_id,
            });
        }
        Ok(out)
    }

    async fn decrypt_i64(&self, vault_key_id: &str, wrapped: &str) -> i64 {
        self.vault
            .unwrap_str(vault_key_id, wrapped)
            .await
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(0)
    }
}

fn gzip(input: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(input)?;
    Ok(encoder.finish()?)
}

fn gunzip(input: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(input);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

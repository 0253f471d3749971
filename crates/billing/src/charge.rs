//! Credit charges.
//!
//! Every charge carries an idempotency key (auto-generated when absent,
//! which makes the call effectively once-only). Replaying a key debits
//! nothing. Non-positive amounts short-circuit as skipped, as does the
//! whole subsystem when self-hosted payment is disabled.

use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use veil_store::{DurableStore, types::UsageEntry};
use veil_vault::TransitVault;

use crate::{BillingError, Result};

/// How long a spent idempotency key stays in the replay window.
const IDEMPOTENCY_TTL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeRequest {
    pub user_id_hash: String,
    pub app_id: String,
    pub skill_id: String,
    pub credits: i64,
    #[serde(default)]
    pub idempotency_key: Option<String>,
    #[serde(default)]
    pub chat_id: Option<String>,
    #[serde(default)]
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargeOutcome {
    Charged,
    /// Non-positive amount or payments disabled.
    Skipped,
    /// Idempotency key replay; nothing debited.
    Duplicate,
}

struct LedgerInner {
    balances: HashMap<String, i64>,
    spent_keys: HashMap<String, Instant>,
}

/// In-process credit ledger with an idempotency replay window.
pub struct ChargeLedger {
    inner: Mutex<LedgerInner>,
    payments_enabled: bool,
}

impl ChargeLedger {
    pub fn new(payments_enabled: bool) -> Self {
        Self {
            inner: Mutex::new(LedgerInner {
                balances: HashMap::new(),
                spent_keys: HashMap::new(),
            }),
            payments_enabled,
        }
    }

    /// Provision (or top up) a user's balance.
    pub async fn credit(&self, user_id_hash: &str, credits: i64) {
        let mut inner = self.inner.lock().await;
        *inner.balances.entry(user_id_hash.to_string()).or_insert(0) += credits;
    }

    pub async fn balance(&self, user_id_hash: &str) -> i64 {
        self.inner
            .lock()
            .await
            .balances
            .get(user_id_hash)
            .copied()
            .unwrap_or(0)
    }

    /// Debit credits. Fails with [`BillingError::InsufficientCredits`] and
    /// debits nothing when the balance cannot cover the amount.
    pub async fn charge(&self, request: &ChargeRequest) -> Result<ChargeOutcome> {
        if !self.payments_enabled {
            debug!(user = %request.user_id_hash, "payments disabled, skipping charge");
            return Ok(ChargeOutcome::Skipped);
        }
        if request.credits <= 0 {
            return Ok(ChargeOutcome::Skipped);
        }

        let key = request.idempotency_key.clone().unwrap_or_else(|| {
            format!(
                "{}{}{}{}",
                request.user_id_hash,
                request.app_id,
                request.skill_id,
                Uuid::new_v4()
            )
        });

        let mut inner = self.inner.lock().await;
        let cutoff = Instant::now() - IDEMPOTENCY_TTL;
        inner.spent_keys.retain(|_, at| *at > cutoff);

        if inner.spent_keys.contains_key(&key) {
            debug!(user = %request.user_id_hash, "idempotency key replay, skipping debit");
            return Ok(ChargeOutcome::Duplicate);
        }

        let available = inner
            .balances
            .get(&request.user_id_hash)
            .copied()
            .unwrap_or(0);
        if available < request.credits {
            return Err(BillingError::InsufficientCredits {
                needed: request.credits,
                available,
            });
        }

        *inner
            .balances
            .entry(request.user_id_hash.clone())
            .or_insert(0) -= request.credits;
        inner.spent_keys.insert(key, Instant::now());

        info!(
            user = %request.user_id_hash,
            app = %request.app_id,
            skill = %request.skill_id,
            credits = request.credits,
            "charged credits"
        );
        Ok(ChargeOutcome::Charged)
    }
}

/// Create the immutable usage entry for a completed skill or LLM call.
/// Numeric fields are transit-wrapped before they touch the store.
#[allow(clippy::too_many_arguments)]
pub async fn record_usage(
    durable: &Arc<dyn DurableStore>,
    vault: &TransitVault,
    vault_key_id: &str,
    user_id_hash: &str,
    app_id: &str,
    skill_id: &str,
    credits: i64,
    model_used: &str,
    input_tokens: u64,
    output_tokens: u64,
    chat_id: Option<String>,
    message_id: Option<String>,
    created_at: i64,
) -> Result<UsageEntry> {
    let entry = UsageEntry {
        id: Uuid::new_v4().to_string(),
        user_id_hash: user_id_hash.to_string(),
        app_id: app_id.to_string(),
        skill_id: skill_id.to_string(),
        encrypted_credits_costs_total: vault
            .wrap_str(vault_key_id, &credits.to_string())
            .await?,
        encrypted_model_used: vault.wrap_str(vault_key_id, model_used).await?,
        encrypted_input_tokens: vault
            .wrap_str(vault_key_id, &input_tokens.to_string())
            .await?,
        encrypted_output_tokens: vault
            .wrap_str(vault_key_id, &output_tokens.to_string())
            .await?,
        created_at,
        chat_id,
        message_id,
        api_key_hash: None,
    };
    durable.insert_usage_entry(&entry).await?;
    Ok(entry)
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn request(credits: i64, key: Option<&str>) -> ChargeRequest {
        ChargeRequest {
            user_id_hash: "uh".into(),
            app_id: "videos".into(),
            skill_id: "transcript".into(),
            credits,
            idempotency_key: key.map(Into::into),
            chat_id: None,
            message_id: None,
        }
    }

    #[tokio::test]
    async fn same_key_debits_once() {
        let ledger = ChargeLedger::new(true);
        ledger.credit("uh", 100).await;

        assert_eq!(
            ledger.charge(&request(30, Some("K"))).await.unwrap(),
            ChargeOutcome::Charged
        );
        assert_eq!(
            ledger.charge(&request(30, Some("K"))).await.unwrap(),
            ChargeOutcome::Duplicate
        );
        assert_eq!(ledger.balance("uh").await, 70);
    }

    #[tokio::test]
    async fn non_positive_amount_is_skipped() {
        let ledger = ChargeLedger::new(true);
        ledger.credit("uh", 10).await;
        assert_eq!(
            ledger.charge(&request(0, None)).await.unwrap(),
            ChargeOutcome::Skipped
        );
        assert_eq!(
            ledger.charge(&request(-5, None)).await.unwrap(),
            ChargeOutcome::Skipped
        );
        assert_eq!(ledger.balance("uh").await, 10);
    }

    #[tokio::test]
    async fn insufficient_credits_debits_nothing() {
        let ledger = ChargeLedger::new(true);
        ledger.credit("uh", 5).await;
        let err = ledger.charge(&request(10, None)).await.unwrap_err();
        assert!(matches!(
            err,
            BillingError::InsufficientCredits {
                needed: 10,
                available: 5
            }
        ));
        assert_eq!(ledger.balance("uh").await, 5);
    }

    #[tokio::test]
    async fn disabled_payments_skip_entirely() {
        let ledger = ChargeLedger::new(false);
        assert_eq!(
            ledger.charge(&request(10, None)).await.unwrap(),
            ChargeOutcome::Skipped
        );
    }
}

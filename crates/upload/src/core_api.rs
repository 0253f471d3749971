//! Client for the core's internal API — the only way state-bearing
//! operations leave this service.

use std::time::Duration;

use {
    async_trait::async_trait,
    serde::{Deserialize, Serialize},
    tracing::warn,
};

use veil_protocol::{INTERNAL_TIMEOUT_SECONDS, INTERNAL_TOKEN_HEADER};
use veil_store::types::EmbedRecord;

use crate::{Result, UploadError};

#[derive(Debug, Clone, Deserialize)]
pub struct ValidatedIdentity {
    pub user_id: String,
    pub user_id_hash: String,
    pub vault_key_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DuplicateCheck {
    pub exists: bool,
    #[serde(default)]
    pub embed: Option<EmbedRecord>,
}

#[derive(Debug, Serialize)]
pub struct ChargeBody {
    pub user_id_hash: String,
    pub app_id: String,
    pub skill_id: String,
    pub credits: i64,
    pub idempotency_key: Option<String>,
}

/// The narrow internal surface. Trait-shaped so the pipeline tests run
/// against a local double.
#[async_trait]
pub trait CoreApi: Send + Sync {
    async fn validate_token(&self, refresh_token: &str) -> Result<ValidatedIdentity>;
    async fn check_duplicate(
        &self,
        hashed_user_id: &str,
        content_hash: &str,
    ) -> Result<DuplicateCheck>;
    async fn wrap_key(&self, aes_key_b64: &str, vault_key_id: &str) -> Result<String>;
    async fn store_record(&self, record: &EmbedRecord) -> Result<()>;
    /// Returns Err(InsufficientCredits) on 402.
    async fn charge(&self, body: &ChargeBody) -> Result<()>;
    /// Fire-and-forget OCR trigger.
    async fn trigger_pdf_processing(&self, embed_id: &str, pages: usize);
}

/// HTTPS implementation against the core.
pub struct HttpCoreApi {
    base_url: String,
    token: String,
    client: reqwest::Client,
}

impl HttpCoreApi {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(INTERNAL_TIMEOUT_SECONDS))
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.into(),
            token: token.into(),
            client,
        }
    }

    async fn post_json<B: Serialize, R: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R> {
        let response = self
            .client
            .post(format!("{}{path}", self.base_url))
            .header(INTERNAL_TOKEN_HEADER, &self.token)
            .json(body)
            .send()
            .await
            .map_err(|e| UploadError::CoreApi(e.to_string()))?;

        match response.status().as_u16() {
            200..=299 => response
                .json()
                .await
                .map_err(|e| UploadError::CoreApi(e.to_string())),
            401 => Err(UploadError::Unauthorized),
            402 => Err(UploadError::InsufficientCredits),
            status => Err(UploadError::CoreApi(format!("{path} returned {status}"))),
        }
    }
}

#[async_trait]
impl CoreApi for HttpCoreApi {
    async fn validate_token(&self, refresh_token: &str) -> Result<ValidatedIdentity> {
        self.post_json(
            "/internal/validate-token",
            &serde_json::json!({ "refresh_token": refresh_token }),
        )
        .await
    }

    async fn check_duplicate(
        &self,
        hashed_user_id: &str,
        content_hash: &str,
    ) -> Result<DuplicateCheck> {
        self.post_json(
            "/internal/uploads/check-duplicate",
            &serde_json::json!({
                "hashed_user_id": hashed_user_id,
                "content_hash": content_hash,
            }),
        )
        .await
    }

    async fn wrap_key(&self, aes_key_b64: &str, vault_key_id: &str) -> Result<String> {
        #[derive(Deserialize)]
        struct WrapResponse {
            vault_wrapped_aes_key: String,
        }
        let response: WrapResponse = self
            .post_json(
                "/internal/uploads/wrap-key",
                &serde_json::json!({
                    "aes_key_b64": aes_key_b64,
                    "vault_key_id": vault_key_id,
                }),
            )
            .await?;
        Ok(response.vault_wrapped_aes_key)
    }

    async fn store_record(&self, record: &EmbedRecord) -> Result<()> {
        let _: serde_json::Value = self
            .post_json("/internal/uploads/store-record", record)
            .await?;
        Ok(())
    }

    async fn charge(&self, body: &ChargeBody) -> Result<()> {
        let _: serde_json::Value = self.post_json("/internal/billing/charge", body).await?;
        Ok(())
    }

    async fn trigger_pdf_processing(&self, embed_id: &str, pages: usize) {
        let result: Result<serde_json::Value> = self
            .post_json(
                "/internal/pdf/process",
                &serde_json::json!({ "embed_id": embed_id, "pages": pages }),
            )
            .await;
        if let Err(e) = result {
            // Fire-and-forget: OCR happens eventually or not at all.
            warn!(embed_id, error = %e, "pdf processing trigger failed");
        }
    }
}

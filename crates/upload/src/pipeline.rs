//! The upload pipeline.
//!
//! Admit → dedup → scan → (detect + variants | page-count + pre-charge)
//! → encrypt → wrap key → store objects → record. The client turns the
//! response into embed TOON content and ships it through the normal
//! zero-knowledge `store_embed` flow; the AES key returned here is the
//! only plaintext copy that ever exists outside the client.

use std::{collections::HashMap, sync::Arc};

use {
    base64::Engine,
    rand::RngCore,
    serde::Serialize,
    sha2::{Digest, Sha256},
    tracing::{info, warn},
    uuid::Uuid,
};

use veil_blob::ObjectStore;
use veil_common::now_unix_secs;
use veil_protocol::{CREDITS_PER_PDF_PAGE, MAX_UPLOAD_BYTES};
use veil_store::types::{EmbedRecord, EmbedStatus, EncryptionMode};
use veil_vault::aes256gcm;

use crate::{
    Result, UploadError,
    core_api::{ChargeBody, CoreApi},
    detect::{AiDetection, AiDetector},
    images::generate_variants,
    pdf::count_pages,
    scan::{MalwareScanner, ScanVerdict},
};

const IMAGE_TYPES: &[&str] = &["image/jpeg", "image/png", "image/webp"];
const PDF_TYPE: &str = "application/pdf";

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub embed_id: String,
    pub deduplicated: bool,
    /// Variant name → object key.
    pub s3_keys: HashMap<String, String>,
    pub aes_key: String,
    pub aes_nonce: String,
    pub vault_wrapped_aes_key: String,
    pub content_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ai_detection: Option<AiDetection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pdf_pages: Option<usize>,
}

pub struct UploadService {
    core: Arc<dyn CoreApi>,
    scanner: Arc<dyn MalwareScanner>,
    detector: Arc<dyn AiDetector>,
    blob: Arc<dyn ObjectStore>,
    bucket: String,
}

impl UploadService {
    pub fn new(
        core: Arc<dyn CoreApi>,
        scanner: Arc<dyn MalwareScanner>,
        detector: Arc<dyn AiDetector>,
        blob: Arc<dyn ObjectStore>,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            core,
            scanner,
            detector,
            blob,
            bucket: bucket.into(),
        }
    }

    /// Process one file end to end.
    pub async fn process(
        &self,
        refresh_token: &str,
        content_type: &str,
        bytes: Vec<u8>,
    ) -> Result<UploadResponse> {
        // 1. Who is this? The cookie goes to the core; we never see
        //    credentials beyond it.
        let identity = self.core.validate_token(refresh_token).await?;

        // 2. Admission: size (inclusive bound) and MIME whitelist.
        let size = bytes.len() as u64;
        if size > MAX_UPLOAD_BYTES {
            return Err(UploadError::TooLarge {
                size,
                limit: MAX_UPLOAD_BYTES,
            });
        }
        let is_image = IMAGE_TYPES.contains(&content_type);
        let is_pdf = content_type == PDF_TYPE;
        if !is_image && !is_pdf {
            return Err(UploadError::UnsupportedType(content_type.to_string()));
        }

        // 3. Dedup: an existing record only counts while its object is
        //    still stored; the core discards stale records itself.
        let content_hash = hex_digest(&bytes);
        let duplicate = self
            .core
            .check_duplicate(&identity.user_id_hash, &content_hash)
            .await?;
        if duplicate.exists
            && let Some(embed) = duplicate.embed
        {
            info!(embed_id = %embed.embed_id, "upload deduplicated");
            return Ok(UploadResponse {
                embed_id: embed.embed_id,
                deduplicated: true,
                s3_keys: embed
                    .file_path
                    .map(|key| HashMap::from([("full".to_string(), key)]))
                    .unwrap_or_default(),
                aes_key: String::new(),
                aes_nonce: String::new(),
                vault_wrapped_aes_key: String::new(),
                content_hash,
                ai_detection: None,
                pdf_pages: None,
            });
        }

        // 4. Malware scan.
        if let ScanVerdict::Threat(threat) = self.scanner.scan(&bytes).await? {
            warn!(user = %identity.user_id_hash, threat = %threat, "upload rejected by scanner");
            return Err(UploadError::MalwareDetected(threat));
        }

        let embed_id = Uuid::new_v4().to_string();
        let timestamp = now_unix_secs();

        // Per-upload AES key + nonce, shared across variants.
        let mut key = [0u8; 32];
        let mut nonce = [0u8; aes256gcm::NONCE_LEN];
        rand::rng().fill_bytes(&mut key);
        rand::rng().fill_bytes(&mut nonce);

        let mut ai_detection = None;
        let mut pdf_pages = None;
        // Variant name → plaintext bytes.
        let mut variants: Vec<(&str, Vec<u8>)> = Vec::new();

        if is_image {
            // 5. Detection is best-effort; variants are not.
            ai_detection = self.detector.detect(&bytes).await;
            let generated = generate_variants(bytes).await?;
            variants.push(("original", generated.original));
            variants.push(("full", generated.full));
            variants.push(("preview", generated.preview));
        } else {
            // 6. PDFs: bounded page count, then an upfront charge before
            //    any stored bytes. 402 leaves no partial work behind.
            let pages = count_pages(bytes.clone()).await?;
            self.core
                .charge(&ChargeBody {
                    user_id_hash: identity.user_id_hash.clone(),
                    app_id: "uploads".into(),
                    skill_id: "pdf".into(),
                    credits: pages as i64 * CREDITS_PER_PDF_PAGE,
                    idempotency_key: Some(format!("pdf:{content_hash}")),
                })
                .await?;
            pdf_pages = Some(pages);
            variants.push(("original", bytes));
        }

        // 7. Wrap the key through the core; after this call returns we
        //    hold no capability to decrypt anything stored earlier.
        let aes_key_b64 = base64::engine::general_purpose::STANDARD.encode(key);
        let vault_wrapped_aes_key = self
            .core
            .wrap_key(&aes_key_b64, &identity.vault_key_id)
            .await?;

        // 8. Encrypt + store every variant.
        let mut s3_keys = HashMap::new();
        for (variant, plaintext) in variants {
            let encrypted = aes256gcm::encrypt_with_nonce(&key, &nonce, &plaintext, b"")?;
            let object_key = format!(
                "{}/{}/{}_{variant}.bin",
                identity.user_id, content_hash, timestamp
            );
            self.blob.put(&self.bucket, &object_key, encrypted).await?;
            s3_keys.insert(variant.to_string(), object_key);
        }

        // 9. Record through the core.
        let record = EmbedRecord {
            hashed_embed_id: hex_digest(embed_id.as_bytes()),
            embed_id: embed_id.clone(),
            encryption_mode: EncryptionMode::Vault,
            encrypted_content: String::new(),
            hashed_user_id: identity.user_id_hash.clone(),
            hashed_chat_id: None,
            hashed_message_id: None,
            r#type: Some(if is_pdf { "document" } else { "image" }.to_string()),
            share_mode: None,
            parent_embed_id: None,
            child_embed_ids: Vec::new(),
            version_number: None,
            file_path: s3_keys.get("full").or_else(|| s3_keys.get("original")).cloned(),
            content_hash: Some(content_hash.clone()),
            status: EmbedStatus::Finished,
            text_length_chars: None,
            created_at: timestamp as i64,
            updated_at: timestamp as i64,
        };
        self.core.store_record(&record).await?;

        // 10. Kick OCR for documents, fire-and-forget.
        if let Some(pages) = pdf_pages {
            self.core.trigger_pdf_processing(&embed_id, pages).await;
        }

        info!(
            embed_id = %embed_id,
            user = %identity.user_id_hash,
            variants = s3_keys.len(),
            "upload stored"
        );
        Ok(UploadResponse {
            embed_id,
            deduplicated: false,
            s3_keys,
            aes_key: aes_key_b64,
            aes_nonce: base64::engine::general_purpose::STANDARD.encode(nonce),
            vault_wrapped_aes_key,
            content_hash,
            ai_detection,
            pdf_pages,
        })
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for byte in digest {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        core_api::{DuplicateCheck, ValidatedIdentity},
        detect::NoopDetector,
        scan::CleanScanner,
    };
    use async_trait::async_trait;
    use std::sync::Mutex;
    use veil_blob::MemoryObjectStore;

    struct FakeCore {
        records: Mutex<Vec<EmbedRecord>>,
        charges: Mutex<Vec<ChargeBody>>,
        duplicate: Mutex<Option<EmbedRecord>>,
        reject_charges: bool,
    }

    impl FakeCore {
        fn new() -> Self {
            Self {
                records: Mutex::new(Vec::new()),
                charges: Mutex::new(Vec::new()),
                duplicate: Mutex::new(None),
                reject_charges: false,
            }
        }
    }

    #[async_trait]
    impl CoreApi for FakeCore {
        async fn validate_token(&self, refresh_token: &str) -> Result<ValidatedIdentity> {
            if refresh_token == "good" {
                Ok(ValidatedIdentity {
                    user_id: "u1".into(),
                    user_id_hash: "uh1".into(),
                    vault_key_id: "vk1".into(),
                })
            } else {
                Err(UploadError::Unauthorized)
            }
        }

        async fn check_duplicate(
            &self,
            _hashed_user_id: &str,
            _content_hash: &str,
        ) -> Result<DuplicateCheck> {
            let embed = self.duplicate.lock().unwrap().clone();
            Ok(DuplicateCheck {
                exists: embed.is_some(),
                embed,
            })
        }

        async fn wrap_key(&self, aes_key_b64: &str, _vault_key_id: &str) -> Result<String> {
            Ok(format!("vault:v1:{aes_key_b64}"))
        }

        async fn store_record(&self, record: &EmbedRecord) -> Result<()> {
            self.records.lock().unwrap().push(record.clone());
            Ok(())
        }

        async fn charge(&self, body: &ChargeBody) -> Result<()> {
            if self.reject_charges {
                return Err(UploadError::InsufficientCredits);
            }
            self.charges.lock().unwrap().push(ChargeBody {
                user_id_hash: body.user_id_hash.clone(),
                app_id: body.app_id.clone(),
                skill_id: body.skill_id.clone(),
                credits: body.credits,
                idempotency_key: body.idempotency_key.clone(),
            });
            Ok(())
        }

        async fn trigger_pdf_processing(&self, _embed_id: &str, _pages: usize) {}
    }

    fn sample_png() -> Vec<u8> {
        let img = image::DynamicImage::new_rgb8(64, 64);
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }

    fn service(core: Arc<FakeCore>) -> (UploadService, Arc<MemoryObjectStore>) {
        let blob = Arc::new(MemoryObjectStore::new());
        let service = UploadService::new(
            core,
            Arc::new(CleanScanner),
            Arc::new(NoopDetector),
            Arc::clone(&blob) as Arc<dyn ObjectStore>,
            "chatfiles-development",
        );
        (service, blob)
    }

    #[tokio::test]
    async fn image_upload_stores_three_encrypted_variants() {
        let core = Arc::new(FakeCore::new());
        let (service, blob) = service(Arc::clone(&core));

        let response = service
            .process("good", "image/png", sample_png())
            .await
            .unwrap();

        assert!(!response.deduplicated);
        assert_eq!(response.s3_keys.len(), 3);
        assert!(response.vault_wrapped_aes_key.starts_with("vault:v1:"));

        // Stored bytes are ciphertext and round-trip with the returned
        // key + nonce.
        let engine = base64::engine::general_purpose::STANDARD;
        let key: [u8; 32] = engine
            .decode(&response.aes_key)
            .unwrap()
            .try_into()
            .unwrap();
        let nonce: [u8; aes256gcm::NONCE_LEN] = engine
            .decode(&response.aes_nonce)
            .unwrap()
            .try_into()
            .unwrap();
        let stored = blob
            .get("chatfiles-development", &response.s3_keys["preview"])
            .await
            .unwrap();
        let decrypted = aes256gcm::decrypt_with_nonce(&key, &nonce, &stored, b"").unwrap();
        assert!(image::load_from_memory(&decrypted).is_ok());

        assert_eq!(core.records.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected_exclusive_bound() {
        let core = Arc::new(FakeCore::new());
        let (service, _) = service(core);

        let oversized = vec![0u8; (MAX_UPLOAD_BYTES + 1) as usize];
        let err = service.process("good", "image/png", oversized).await.unwrap_err();
        assert!(matches!(err, UploadError::TooLarge { .. }));
        assert_eq!(err.status_code(), 413);
    }

    #[tokio::test]
    async fn unsupported_mime_is_rejected() {
        let core = Arc::new(FakeCore::new());
        let (service, _) = service(core);
        let err = service
            .process("good", "text/html", b"<html>".to_vec())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::UnsupportedType(_)));
    }

    #[tokio::test]
    async fn bad_token_is_unauthorized() {
        let core = Arc::new(FakeCore::new());
        let (service, _) = service(core);
        let err = service
            .process("bad", "image/png", sample_png())
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::Unauthorized));
    }

    #[tokio::test]
    async fn duplicate_returns_cached_metadata() {
        let core = Arc::new(FakeCore::new());
        *core.duplicate.lock().unwrap() = Some(EmbedRecord {
            hashed_embed_id: "he".into(),
            embed_id: "existing".into(),
            encryption_mode: EncryptionMode::Vault,
            encrypted_content: String::new(),
            hashed_user_id: "uh1".into(),
            hashed_chat_id: None,
            hashed_message_id: None,
            r#type: Some("image".into()),
            share_mode: None,
            parent_embed_id: None,
            child_embed_ids: Vec::new(),
            version_number: None,
            file_path: Some("uh1/hash/1_full.bin".into()),
            content_hash: Some("hash".into()),
            status: EmbedStatus::Finished,
            text_length_chars: None,
            created_at: 1,
            updated_at: 1,
        });
        let (service, blob) = service(Arc::clone(&core));

        let response = service
            .process("good", "image/png", sample_png())
            .await
            .unwrap();
        assert!(response.deduplicated);
        assert_eq!(response.embed_id, "existing");
        // Nothing new stored.
        assert!(blob
            .list_prefix("chatfiles-development", "")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn pdf_precharge_failure_leaves_no_partial_work() {
        let mut core = FakeCore::new();
        core.reject_charges = true;
        let core = Arc::new(core);
        let (service, blob) = service(Arc::clone(&core));

        // A PDF that parses: reuse the fixture from the pdf module.
        let pdf = crate::pdf::tests_support::minimal_pdf(2);
        let err = service
            .process("good", "application/pdf", pdf)
            .await
            .unwrap_err();
        assert!(matches!(err, UploadError::InsufficientCredits));
        assert_eq!(err.status_code(), 402);
        assert!(blob
            .list_prefix("chatfiles-development", "")
            .await
            .unwrap()
            .is_empty());
        assert!(core.records.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn pdf_charges_three_credits_per_page() {
        let core = Arc::new(FakeCore::new());
        let (service, _) = service(Arc::clone(&core));

        let pdf = crate::pdf::tests_support::minimal_pdf(4);
        let response = service
            .process("good", "application/pdf", pdf)
            .await
            .unwrap();
        assert_eq!(response.pdf_pages, Some(4));

        let charges = core.charges.lock().unwrap();
        assert_eq!(charges.len(), 1);
        assert_eq!(charges[0].credits, 12);
    }
}

//! HTTP-backed skill handler.
//!
//! Skill apps run as their own processes; each callable skill declares an
//! endpoint in its `api_config` and the fabric forwards request elements
//! there. The whole element body (including the whitelisted `_`-prefixed
//! context fields) travels as JSON. Externally fetched text in the
//! results passes through the sanitization boundary before it can reach
//! the LLM.

use std::{sync::Arc, time::Duration};

use {async_trait::async_trait, tracing::warn};

use crate::{
    fabric::SkillHandler,
    sanitize::{PassthroughSanitizer, Sanitized, Sanitizer},
    types::{SkillContext, SkillRequest},
};

/// Timeout for one skill element call.
const SKILL_TIMEOUT: Duration = Duration::from_secs(30);

/// Result fields treated as externally fetched text.
const TEXT_FIELDS: &[&str] = &["text", "transcript", "content", "page_text"];

pub struct HttpSkillHandler {
    endpoint: String,
    client: reqwest::Client,
    sanitizer: Arc<dyn Sanitizer>,
}

impl HttpSkillHandler {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self::with_sanitizer(endpoint, Arc::new(PassthroughSanitizer))
    }

    pub fn with_sanitizer(endpoint: impl Into<String>, sanitizer: Arc<dyn Sanitizer>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(SKILL_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            endpoint: endpoint.into(),
            client,
            sanitizer,
        }
    }

    /// Run every recognised text field through the sanitizer. Blocked or
    /// failed content fails this element; siblings are unaffected.
    async fn sanitize_results(
        &self,
        mut results: Vec<serde_json::Value>,
        request_id: &crate::types::SkillRequestId,
    ) -> Result<Vec<serde_json::Value>, String> {
        for result in &mut results {
            let Some(object) = result.as_object_mut() else {
                continue;
            };
            for field in TEXT_FIELDS {
                let Some(text) = object.get(*field).and_then(|v| v.as_str()) else {
                    continue;
                };
                match self.sanitizer.sanitize(text).await {
                    Sanitized::Clean(clean) => {
                        object.insert((*field).to_string(), serde_json::Value::String(clean));
                    },
                    Sanitized::Blocked => {
                        return Err(format!(
                            "content blocked by sanitization (id: {request_id})"
                        ));
                    },
                    Sanitized::Failed => {
                        return Err(format!(
                            "content sanitization failed (id: {request_id})"
                        ));
                    },
                }
            }
        }
        Ok(results)
    }
}

#[async_trait]
impl SkillHandler for HttpSkillHandler {
    async fn execute(
        &self,
        request: &SkillRequest,
        context: &SkillContext,
    ) -> Result<Vec<serde_json::Value>, String> {
        let mut body = serde_json::json!({
            "requests": [request],
        });
        if let Ok(context_value) = serde_json::to_value(context)
            && let (Some(target), Some(fields)) = (body.as_object_mut(), context_value.as_object())
        {
            for (key, value) in fields {
                target.insert(key.clone(), value.clone());
            }
        }

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| format!("skill endpoint unreachable (id: {}): {e}", request.id))?;

        if !response.status().is_success() {
            let status = response.status();
            warn!(endpoint = %self.endpoint, %status, "skill endpoint error");
            return Err(format!(
                "skill endpoint returned {status} (id: {})",
                request.id
            ));
        }

        let value: serde_json::Value = response
            .json()
            .await
            .map_err(|e| format!("skill endpoint returned non-JSON (id: {}): {e}", request.id))?;

        // Element responses arrive grouped `[{id, results}]`; unwrap the
        // single element we sent.
        let results = if let Some(results) = value["results"][0]["results"].as_array() {
            results.clone()
        } else if let Some(results) = value["results"].as_array() {
            results.clone()
        } else {
            vec![value]
        };

        self.sanitize_results(results, &request.id).await
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SkillRequestId;

    struct BlockEverything;

    #[async_trait]
    impl Sanitizer for BlockEverything {
        async fn sanitize(&self, _text: &str) -> Sanitized {
            Sanitized::Blocked
        }
    }

    #[tokio::test]
    async fn blocked_content_fails_the_element() {
        let handler = HttpSkillHandler::with_sanitizer("http://unused", Arc::new(BlockEverything));
        let results = vec![serde_json::json!({ "transcript": "fetched text" })];
        let err = handler
            .sanitize_results(results, &SkillRequestId::Text("b".into()))
            .await
            .unwrap_err();
        assert!(err.contains("blocked"));
        assert!(err.contains("(id: b)"));
    }

    #[tokio::test]
    async fn clean_content_passes_through() {
        let handler = HttpSkillHandler::new("http://unused");
        let results = vec![serde_json::json!({ "transcript": "fine", "url": "https://x" })];
        let out = handler
            .sanitize_results(results, &SkillRequestId::Number(1))
            .await
            .unwrap();
        assert_eq!(out[0]["transcript"], "fine");
        assert_eq!(out[0]["url"], "https://x");
    }

    #[tokio::test]
    async fn empty_fetched_text_fails_the_element() {
        let handler = HttpSkillHandler::new("http://unused");
        let results = vec![serde_json::json!({ "text": "   " })];
        let err = handler
            .sanitize_results(results, &SkillRequestId::Number(1))
            .await
            .unwrap_err();
        assert!(err.contains("sanitization failed"));
    }
}

//! Skill declarations and the request/response contract.

use serde::{Deserialize, Serialize};

// ── Declarations ─────────────────────────────────────────────────────────────

/// Rollout stage; skills are filtered by environment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkillStage {
    Planning,
    Development,
    Production,
}

impl SkillStage {
    /// Whether a skill at this stage is callable in the given environment.
    pub fn available_in_production(self) -> bool {
        matches!(self, Self::Production)
    }
}

/// One skill as declared in an app's `app.yml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillSpec {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub stage: SkillStage,
    /// JSON Schema for the tool parameters, as exposed to the LLM.
    pub tool_schema: serde_json::Value,
    /// Credits charged per successful element; absent or zero means free.
    #[serde(default)]
    pub pricing_credits: Option<i64>,
    #[serde(default)]
    pub preprocessor_hint: Option<String>,
    #[serde(default)]
    pub api_config: Option<serde_json::Value>,
}

// ── Request contract ─────────────────────────────────────────────────────────

/// Request element ids may be numbers or UUID strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SkillRequestId {
    Number(i64),
    Text(String),
}

impl std::fmt::Display for SkillRequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

impl Default for SkillRequestId {
    fn default() -> Self {
        // Single-request calls default to id=1.
        Self::Number(1)
    }
}

/// One element of the `requests` array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillRequest {
    #[serde(default)]
    pub id: SkillRequestId,
    /// Skill-specific fields, validated against the skill's schema.
    #[serde(flatten)]
    pub body: serde_json::Map<String, serde_json::Value>,
}

/// Whitelisted context fields injected by the fabric. Underscore-prefixed
/// on the wire so they never collide with schema fields.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillContext {
    #[serde(rename = "_user_id", default)]
    pub user_id: Option<String>,
    #[serde(rename = "_api_key_name", default)]
    pub api_key_name: Option<String>,
    #[serde(rename = "_external_request", default)]
    pub external_request: bool,
    /// Task-scoped id used for per-skill cancellation.
    #[serde(rename = "_skill_task_id", default)]
    pub skill_task_id: Option<String>,
}

/// The full invocation body: `{ requests: [...] }` plus context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillInvocation {
    pub requests: Vec<SkillRequest>,
    #[serde(flatten, default)]
    pub context: SkillContext,
}

// ── Response contract ────────────────────────────────────────────────────────

/// Results for one request element; `results` is empty for failures and
/// the element's error is folded into the invocation-level error string.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillRequestResult {
    pub id: SkillRequestId,
    pub results: Vec<serde_json::Value>,
}

/// Outcome of one skill invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SkillOutcome {
    pub results: Vec<SkillRequestResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Set when a per-skill cancel flag fired; the runner feeds this back
    /// to the LLM as the tool reply.
    #[serde(default)]
    pub cancelled: bool,
}

impl SkillOutcome {
    pub fn cancelled() -> Self {
        Self {
            results: Vec::new(),
            error: None,
            cancelled: true,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn request_id_accepts_number_or_string() {
        let a: SkillRequest = serde_json::from_str(r#"{"id": "a", "url": "x"}"#).unwrap();
        let b: SkillRequest = serde_json::from_str(r#"{"id": 2, "url": "y"}"#).unwrap();
        assert_eq!(a.id, SkillRequestId::Text("a".into()));
        assert_eq!(b.id, SkillRequestId::Number(2));
    }

    #[test]
    fn missing_id_defaults_to_one() {
        let request: SkillRequest = serde_json::from_str(r#"{"url": "x"}"#).unwrap();
        assert_eq!(request.id, SkillRequestId::Number(1));
    }

    #[test]
    fn context_fields_use_underscore_names() {
        let invocation: SkillInvocation = serde_json::from_str(
            r#"{"requests": [], "_user_id": "u1", "_external_request": true}"#,
        )
        .unwrap();
        assert_eq!(invocation.context.user_id.as_deref(), Some("u1"));
        assert!(invocation.context.external_request);
    }
}

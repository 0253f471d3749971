//! `@`-directive parsing.
//!
//! Users can steer routing from inside the message body:
//!
//! - `@ai-model:{model_id}` or `@ai-model:{model_id}:{provider}`
//! - `@best-model:{category}` (ignored when `@ai-model` is present)
//! - `@mate:{mate_id}`
//! - `@skill:{app_id}:{skill_id}` (repeatable)
//! - `@focus:{app_id}:{focus_id}` (repeatable)
//!
//! Directives are case-insensitive and removed from the message; the
//! remainder is whitespace-normalised.

// Directive patterns are compile-time literals.
#![allow(clippy::expect_used)]

use std::collections::HashMap;

use {once_cell::sync::Lazy, regex::Regex, tracing::{info, warn}};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserOverrides {
    pub model_id: Option<String>,
    pub model_provider: Option<String>,
    pub best_model_category: Option<String>,
    pub mate_id: Option<String>,
    pub skills: Vec<(String, String)>,
    pub focus_modes: Vec<(String, String)>,
    pub cleaned_message: String,
    pub has_overrides: bool,
}

static MODEL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)@ai-model:([a-zA-Z0-9._-]+)(?::([a-zA-Z0-9_-]+))?").expect("static regex")
});
static BEST_MODEL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)@best-model:([a-zA-Z0-9_-]+)").expect("static regex"));
static MATE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)@mate:([a-zA-Z0-9_-]+)").expect("static regex"));
static SKILL_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)@skill:([a-zA-Z0-9_-]+):([a-zA-Z0-9_-]+)").expect("static regex"));
static FOCUS_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)@focus:([a-zA-Z0-9_-]+):([a-zA-Z0-9_-]+)").expect("static regex"));

/// Extract overrides from a message, returning the parsed set plus the
/// cleaned body.
pub fn parse_overrides(message: &str) -> UserOverrides {
    if message.is_empty() {
        return UserOverrides::default();
    }

    let mut overrides = UserOverrides::default();
    let mut cleaned = message.to_string();

    if let Some(caps) = MODEL_PATTERN.captures(message) {
        overrides.model_id = caps.get(1).map(|m| m.as_str().to_string());
        overrides.model_provider = caps.get(2).map(|m| m.as_str().to_string());
        overrides.has_overrides = true;
        cleaned = MODEL_PATTERN.replace_all(&cleaned, "").into_owned();
        info!(
            model_id = overrides.model_id.as_deref().unwrap_or(""),
            provider = overrides.model_provider.as_deref().unwrap_or(""),
            "model override"
        );
    }

    // `@best-model` yields to a direct `@ai-model`.
    if overrides.model_id.is_none()
        && let Some(caps) = BEST_MODEL_PATTERN.captures(message)
    {
        overrides.best_model_category = caps.get(1).map(|m| m.as_str().to_lowercase());
        overrides.has_overrides = true;
    }
    cleaned = BEST_MODEL_PATTERN.replace_all(&cleaned, "").into_owned();

    if let Some(caps) = MATE_PATTERN.captures(message) {
        overrides.mate_id = caps.get(1).map(|m| m.as_str().to_string());
        overrides.has_overrides = true;
        cleaned = MATE_PATTERN.replace_all(&cleaned, "").into_owned();
    }

    for caps in SKILL_PATTERN.captures_iter(message) {
        if let (Some(app), Some(skill)) = (caps.get(1), caps.get(2)) {
            overrides
                .skills
                .push((app.as_str().to_string(), skill.as_str().to_string()));
            overrides.has_overrides = true;
        }
    }
    cleaned = SKILL_PATTERN.replace_all(&cleaned, "").into_owned();

    for caps in FOCUS_PATTERN.captures_iter(message) {
        if let (Some(app), Some(focus)) = (caps.get(1), caps.get(2)) {
            overrides
                .focus_modes
                .push((app.as_str().to_string(), focus.as_str().to_string()));
            overrides.has_overrides = true;
        }
    }
    cleaned = FOCUS_PATTERN.replace_all(&cleaned, "").into_owned();

    overrides.cleaned_message = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    overrides
}

/// Re-attach directives to a clean body. Inverse of [`parse_overrides`]
/// for the directive set it can express.
pub fn compose_message_with_directives(overrides: &UserOverrides, text: &str) -> String {
    let mut parts = vec![text.to_string()];
    if let Some(model_id) = &overrides.model_id {
        match &overrides.model_provider {
            Some(provider) => parts.push(format!("@ai-model:{model_id}:{provider}")),
            None => parts.push(format!("@ai-model:{model_id}")),
        }
    } else if let Some(category) = &overrides.best_model_category {
        parts.push(format!("@best-model:{category}"));
    }
    if let Some(mate_id) = &overrides.mate_id {
        parts.push(format!("@mate:{mate_id}"));
    }
    for (app, skill) in &overrides.skills {
        parts.push(format!("@skill:{app}:{skill}"));
    }
    for (app, focus) in &overrides.focus_modes {
        parts.push(format!("@focus:{app}:{focus}"));
    }
    parts.retain(|p| !p.is_empty());
    parts.join(" ")
}

/// Validate a user-supplied model override against the configured models.
///
/// `available_models` maps model id → list of provider ids serving it
/// (first one is the default). Matching is case-insensitive with
/// normalisation back to the configured spelling.
pub fn validate_model_override(
    model_id: &str,
    provider_id: Option<&str>,
    available_models: &HashMap<String, Vec<String>>,
) -> Option<(String, Option<String>)> {
    if model_id.is_empty() {
        return None;
    }

    let resolved_model = if available_models.contains_key(model_id) {
        model_id.to_string()
    } else {
        match available_models
            .keys()
            .find(|id| id.eq_ignore_ascii_case(model_id))
        {
            Some(id) => id.clone(),
            None => {
                warn!(model_id, "model override not found in available models");
                return None;
            },
        }
    };

    let servers = &available_models[&resolved_model];
    let resolved_provider = match provider_id {
        Some(requested) => match servers.iter().find(|s| s.eq_ignore_ascii_case(requested)) {
            Some(provider) => Some(provider.clone()),
            None => {
                warn!(
                    model_id = %resolved_model,
                    provider = requested,
                    "provider override not available for model"
                );
                return None;
            },
        },
        None => servers.first().cloned(),
    };

    Some((resolved_model, resolved_provider))
}

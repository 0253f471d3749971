//! Leaderboard-driven model selection.
//!
//! The leaderboard snapshot is loaded once at startup and held immutable.
//! Selection filters it down: auto-select opt-in, country-of-origin
//! exclusion for sensitive content, availability intersection; then picks
//! primary/secondary by task complexity and user satisfaction, with a
//! hard-coded reliable fallback.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::info;

/// Reliable default. Must carry a provider prefix for billing/routing.
pub const DEFAULT_FALLBACK_MODEL: &str = "anthropic/sonnet-large";
/// Used when the primary already resolved to the default.
pub const DEFAULT_FALLBACK_MODEL_ALT: &str = "anthropic/haiku-small";

/// Model ids preferred for simple tasks.
const ECONOMICAL_MODELS: &[&str] = &["haiku-small", "flash-mini", "gpt-compact"];
/// Model ids preferred for complex tasks or unhappy users.
const PREMIUM_MODELS: &[&str] = &["opus-max", "sonnet-large", "gemini-ultra", "gpt-frontier"];

/// One ranked row of the leaderboard snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardEntry {
    pub model_id: String,
    pub provider_id: String,
    /// Composite score; the snapshot arrives sorted descending.
    pub score: f64,
    #[serde(default)]
    pub country_origin: Option<String>,
    /// Models opt in to automatic selection; absent means false.
    #[serde(default)]
    pub allow_auto_select: bool,
}

impl LeaderboardEntry {
    fn full_id(&self) -> String {
        format!("{}/{}", self.provider_id, self.model_id)
    }
}

/// Immutable post-init snapshot of the rankings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeaderboardSnapshot {
    pub rankings: Vec<LeaderboardEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Complexity {
    Simple,
    Complex,
}

/// Inputs produced by the preprocessing LLM (not keyword matching).
#[derive(Debug, Clone)]
pub struct SelectionInput {
    pub task_area: String,
    pub complexity: Complexity,
    pub china_related: bool,
    pub user_unhappy: bool,
    pub required_input_type: Option<String>,
    pub available_model_ids: Option<Vec<String>>,
}

impl Default for SelectionInput {
    fn default() -> Self {
        Self {
            task_area: "general".into(),
            complexity: Complexity::Simple,
            china_related: false,
            user_unhappy: false,
            required_input_type: None,
            available_model_ids: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelSelection {
    pub primary: String,
    pub secondary: Option<String>,
    pub fallback: String,
    pub reason: String,
    pub filtered_cn_models: bool,
}

impl ModelSelection {
    /// De-duplicated try-order: primary, secondary, fallback.
    pub fn try_order(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        [
            Some(self.primary.clone()),
            self.secondary.clone(),
            Some(self.fallback.clone()),
        ]
        .into_iter()
        .flatten()
        .filter(|id| seen.insert(id.clone()))
        .collect()
    }
}

pub struct ModelSelector {
    snapshot: LeaderboardSnapshot,
}

impl ModelSelector {
    pub fn new(snapshot: LeaderboardSnapshot) -> Self {
        Self { snapshot }
    }

    fn ranked(&self, exclude_cn: bool, only_auto_select: bool) -> Vec<&LeaderboardEntry> {
        self.snapshot
            .rankings
            .iter()
            .filter(|entry| !only_auto_select || entry.allow_auto_select)
            .filter(|entry| !exclude_cn || entry.country_origin.as_deref() != Some("CN"))
            .collect()
    }

    pub fn select(&self, input: &SelectionInput) -> ModelSelection {
        let mut reasons = Vec::new();

        let mut ranked = self.ranked(input.china_related, true);
        if ranked.is_empty() {
            let unfiltered = self.ranked(input.china_related, false);
            if unfiltered.is_empty() {
                reasons.push("no ranked models available in leaderboard".to_string());
            } else {
                reasons.push(format!(
                    "no models with auto-select enabled ({} filtered)",
                    unfiltered.len()
                ));
            }
        } else {
            reasons.push(format!("{} auto-selectable models", ranked.len()));
        }
        if input.china_related {
            reasons.push("CN models excluded".to_string());
        }

        if let Some(available) = &input.available_model_ids {
            let available: HashSet<&str> = available.iter().map(String::as_str).collect();
            ranked.retain(|entry| available.contains(entry.model_id.as_str()));
            reasons.push(format!("{} after availability filter", ranked.len()));
        }

        // Capability filtering by required_input_type would slot in here;
        // the snapshot does not carry input types yet.
        let _ = &input.required_input_type;

        let prefer_economical =
            input.complexity == Complexity::Simple && !input.user_unhappy;
        let prefer_premium = input.complexity == Complexity::Complex || input.user_unhappy;
        if prefer_premium {
            reasons.push("premium preferred (complex task or user unhappy)".to_string());
        } else if prefer_economical {
            reasons.push("economical preferred (simple task)".to_string());
        }

        let preferred_set: Option<&[&str]> = if prefer_economical {
            Some(ECONOMICAL_MODELS)
        } else if prefer_premium {
            Some(PREMIUM_MODELS)
        } else {
            None
        };

        let mut primary_entry: Option<&LeaderboardEntry> = None;
        if let Some(set) = preferred_set {
            primary_entry = ranked
                .iter()
                .find(|entry| set.contains(&entry.model_id.as_str()))
                .copied();
        }
        if primary_entry.is_none() {
            primary_entry = ranked.first().copied();
            if primary_entry.is_some() && preferred_set.is_some() {
                reasons.push("top-ranked (no preferred-set match)".to_string());
            }
        }

        let primary = match primary_entry {
            Some(entry) => {
                reasons.push(format!("primary {}", entry.full_id()));
                entry.full_id()
            },
            None => {
                reasons.push(format!("using default {DEFAULT_FALLBACK_MODEL}"));
                DEFAULT_FALLBACK_MODEL.to_string()
            },
        };

        let secondary = primary_entry.and_then(|p| {
            ranked
                .iter()
                .find(|entry| entry.model_id != p.model_id)
                .map(|entry| entry.full_id())
        });

        let fallback = if primary == DEFAULT_FALLBACK_MODEL {
            DEFAULT_FALLBACK_MODEL_ALT.to_string()
        } else {
            DEFAULT_FALLBACK_MODEL.to_string()
        };

        let reason = reasons.join("; ");
        info!(
            task_area = %input.task_area,
            primary = %primary,
            secondary = secondary.as_deref().unwrap_or("-"),
            fallback = %fallback,
            %reason,
            "model selection"
        );

        ModelSelection {
            primary,
            secondary,
            fallback,
            reason,
            filtered_cn_models: input.china_related,
        }
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn entry(model: &str, provider: &str, score: f64, cn: bool, auto: bool) -> LeaderboardEntry {
        LeaderboardEntry {
            model_id: model.into(),
            provider_id: provider.into(),
            score,
            country_origin: cn.then(|| "CN".to_string()),
            allow_auto_select: auto,
        }
    }

    fn snapshot() -> LeaderboardSnapshot {
        LeaderboardSnapshot {
            rankings: vec![
                entry("opus-max", "anthropic", 98.0, false, true),
                entry("qwen-giant", "alibaba", 97.0, true, true),
                entry("sonnet-large", "anthropic", 95.0, false, true),
                entry("haiku-small", "anthropic", 90.0, false, true),
                entry("hidden-model", "lab", 99.0, false, false),
            ],
        }
    }

    #[test]
    fn simple_task_prefers_economical() {
        let selector = ModelSelector::new(snapshot());
        let selection = selector.select(&SelectionInput::default());
        assert_eq!(selection.primary, "anthropic/haiku-small");
        // Secondary is the best-ranked model with a different id.
        assert_eq!(selection.secondary.as_deref(), Some("anthropic/opus-max"));
        assert_eq!(selection.fallback, DEFAULT_FALLBACK_MODEL);
    }

    #[test]
    fn complex_or_unhappy_prefers_premium() {
        let selector = ModelSelector::new(snapshot());
        let selection = selector.select(&SelectionInput {
            complexity: Complexity::Complex,
            ..Default::default()
        });
        assert_eq!(selection.primary, "anthropic/opus-max");

        let unhappy = selector.select(&SelectionInput {
            user_unhappy: true,
            ..Default::default()
        });
        assert_eq!(unhappy.primary, "anthropic/opus-max");
    }

    #[test]
    fn china_related_drops_cn_models() {
        let selector = ModelSelector::new(snapshot());
        let selection = selector.select(&SelectionInput {
            china_related: true,
            complexity: Complexity::Complex,
            ..Default::default()
        });
        assert!(selection.filtered_cn_models);
        assert_ne!(selection.primary, "alibaba/qwen-giant");
        assert_ne!(selection.secondary.as_deref(), Some("alibaba/qwen-giant"));
    }

    #[test]
    fn auto_select_opt_in_is_required() {
        let selector = ModelSelector::new(snapshot());
        let selection = selector.select(&SelectionInput {
            complexity: Complexity::Complex,
            ..Default::default()
        });
        // hidden-model outranks everything but never auto-selects.
        assert_ne!(selection.primary, "lab/hidden-model");
    }

    #[test]
    fn availability_filter_intersects() {
        let selector = ModelSelector::new(snapshot());
        let selection = selector.select(&SelectionInput {
            available_model_ids: Some(vec!["sonnet-large".into()]),
            complexity: Complexity::Complex,
            ..Default::default()
        });
        assert_eq!(selection.primary, "anthropic/sonnet-large");
        assert!(selection.secondary.is_none());
    }

    #[test]
    fn empty_leaderboard_falls_back_with_alt() {
        let selector = ModelSelector::new(LeaderboardSnapshot::default());
        let selection = selector.select(&SelectionInput::default());
        assert_eq!(selection.primary, DEFAULT_FALLBACK_MODEL);
        assert_eq!(selection.fallback, DEFAULT_FALLBACK_MODEL_ALT);
    }

    #[test]
    fn try_order_is_deduplicated() {
        let selection = ModelSelection {
            primary: "a/m1".into(),
            secondary: Some("a/m1".into()),
            fallback: "a/m2".into(),
            reason: String::new(),
            filtered_cn_models: false,
        };
        assert_eq!(selection.try_order(), vec!["a/m1".to_string(), "a/m2".to_string()]);
    }
}

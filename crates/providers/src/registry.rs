//! Registry of available providers, keyed by model id.

use std::{collections::HashMap, sync::Arc};

use secrecy::Secret;
use tracing::info;

use crate::{model::ChatProvider, openai_compat::OpenAiCompatProvider};

/// Info about an available model.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub provider: String,
    pub display_name: String,
}

/// Registry of LLM providers. Built once at startup and held immutable.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ChatProvider>>,
    models: Vec<ModelInfo>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider. First registration wins for a model id.
    pub fn register(&mut self, info: ModelInfo, provider: Arc<dyn ChatProvider>) {
        if self.providers.contains_key(&info.id) {
            return;
        }
        self.providers.insert(info.id.clone(), provider);
        self.models.push(info);
    }

    /// Register every OpenAI-compatible endpoint found in the environment.
    /// `VEIL_PROVIDER_<NAME>_{KEY,URL,MODEL}` triples declare one endpoint
    /// each; absent variables skip the provider silently.
    pub fn register_from_env(&mut self, names: &[&str]) {
        for name in names {
            let upper = name.to_uppercase().replace('-', "_");
            let Ok(key) = std::env::var(format!("VEIL_PROVIDER_{upper}_KEY")) else {
                continue;
            };
            let Ok(url) = std::env::var(format!("VEIL_PROVIDER_{upper}_URL")) else {
                continue;
            };
            let Ok(model) = std::env::var(format!("VEIL_PROVIDER_{upper}_MODEL")) else {
                continue;
            };
            if key.is_empty() {
                continue;
            }
            let provider = Arc::new(OpenAiCompatProvider::new(
                Secret::new(key),
                model.clone(),
                url,
                (*name).to_string(),
            ));
            self.register(
                ModelInfo {
                    id: model.clone(),
                    provider: (*name).to_string(),
                    display_name: model,
                },
                provider,
            );
        }
        info!(models = self.models.len(), "provider registry initialised");
    }

    /// Look up by model id, accepting either `model` or `provider/model`.
    pub fn get(&self, model_id: &str) -> Option<Arc<dyn ChatProvider>> {
        if let Some(provider) = self.providers.get(model_id) {
            return Some(Arc::clone(provider));
        }
        model_id
            .split_once('/')
            .and_then(|(_, bare)| self.providers.get(bare))
            .cloned()
    }

    pub fn first(&self) -> Option<Arc<dyn ChatProvider>> {
        self.models
            .first()
            .and_then(|m| self.providers.get(&m.id))
            .cloned()
    }

    pub fn list_models(&self) -> &[ModelInfo] {
        &self.models
    }

    pub fn model_ids(&self) -> Vec<String> {
        self.models.iter().map(|m| m.id.clone()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::ScriptedProvider;

    #[test]
    fn first_registration_wins() {
        let mut registry = ProviderRegistry::new();
        registry.register(
            ModelInfo {
                id: "m1".into(),
                provider: "a".into(),
                display_name: "M1 (a)".into(),
            },
            Arc::new(ScriptedProvider::new("m1", vec![])),
        );
        registry.register(
            ModelInfo {
                id: "m1".into(),
                provider: "b".into(),
                display_name: "M1 (b)".into(),
            },
            Arc::new(ScriptedProvider::new("m1", vec![])),
        );
        assert_eq!(registry.list_models().len(), 1);
        assert_eq!(registry.list_models()[0].provider, "a");
    }

    #[test]
    fn lookup_accepts_provider_prefixed_ids() {
        let mut registry = ProviderRegistry::new();
        registry.register(
            ModelInfo {
                id: "sonnet-large".into(),
                provider: "anthropic".into(),
                display_name: "Sonnet".into(),
            },
            Arc::new(ScriptedProvider::new("sonnet-large", vec![])),
        );
        assert!(registry.get("sonnet-large").is_some());
        assert!(registry.get("anthropic/sonnet-large").is_some());
        assert!(registry.get("anthropic/missing").is_none());
    }
}

//! The execution fabric: parallel request-array processing.

use std::{collections::HashMap, sync::Arc};

use {async_trait::async_trait, futures::future::join_all, tracing::{info, warn}};

use crate::{
    Result, SkillError,
    registry::SkillRegistry,
    types::{SkillContext, SkillInvocation, SkillOutcome, SkillRequest, SkillRequestResult},
};

/// Executes one request element. Implementations fetch, sanitize, and
/// shape their own results; error strings should carry enough context
/// (the offending input and the element id) to stand alone in the
/// invocation-level error.
#[async_trait]
pub trait SkillHandler: Send + Sync {
    async fn execute(
        &self,
        request: &SkillRequest,
        context: &SkillContext,
    ) -> std::result::Result<Vec<serde_json::Value>, String>;
}

/// Observes per-skill cancel flags. The cache tier implements this in the
/// gateway; tests use [`NeverCancelled`].
#[async_trait]
pub trait CancelProbe: Send + Sync {
    async fn is_cancelled(&self, skill_task_id: &str) -> bool;
}

pub struct NeverCancelled;

#[async_trait]
impl CancelProbe for NeverCancelled {
    async fn is_cancelled(&self, _skill_task_id: &str) -> bool {
        false
    }
}

/// Called once per successful invocation to debit credits. The narrow
/// internal billing endpoint sits behind this in production.
#[async_trait]
pub trait ChargeHook: Send + Sync {
    async fn charge(&self, user_id: &str, app_id: &str, skill_id: &str, credits: i64);
}

/// Routes invocations to handlers with per-element isolation.
pub struct SkillFabric {
    registry: Arc<SkillRegistry>,
    handlers: HashMap<String, Arc<dyn SkillHandler>>,
    cancel_probe: Arc<dyn CancelProbe>,
    charge_hook: Option<Arc<dyn ChargeHook>>,
}

impl SkillFabric {
    pub fn new(registry: Arc<SkillRegistry>, cancel_probe: Arc<dyn CancelProbe>) -> Self {
        Self {
            registry,
            handlers: HashMap::new(),
            cancel_probe,
            charge_hook: None,
        }
    }

    pub fn with_charge_hook(mut self, hook: Arc<dyn ChargeHook>) -> Self {
        self.charge_hook = Some(hook);
        self
    }

    /// Register the handler for `"{app_id}-{skill_id}"`.
    pub fn register_handler(&mut self, key: impl Into<String>, handler: Arc<dyn SkillHandler>) {
        self.handlers.insert(key.into(), handler);
    }

    /// Run one invocation. All elements of `requests` execute
    /// concurrently; one element's failure never fails its siblings.
    /// The cancel flag is honoured on entry and again per element.
    pub async fn dispatch(&self, key: &str, invocation: SkillInvocation) -> Result<SkillOutcome> {
        let (app_id, spec) = self.registry.get(key)?;
        let handler = self
            .handlers
            .get(key)
            .ok_or_else(|| SkillError::UnknownSkill(key.to_string()))?;

        if invocation.requests.is_empty() {
            return Err(SkillError::InvalidRequest("requests array is empty".into()));
        }

        if let Some(skill_task_id) = &invocation.context.skill_task_id
            && self.cancel_probe.is_cancelled(skill_task_id).await
        {
            info!(key, skill_task_id, "skill cancelled before execution");
            return Ok(SkillOutcome::cancelled());
        }

        let context = invocation.context.clone();
        let futures = invocation.requests.iter().map(|request| {
            let context = context.clone();
            let handler = Arc::clone(handler);
            let probe = Arc::clone(&self.cancel_probe);
            async move {
                if let Some(skill_task_id) = &context.skill_task_id
                    && probe.is_cancelled(skill_task_id).await
                {
                    return (request.id.clone(), Err("cancelled".to_string()), true);
                }
                let result = handler.execute(request, &context).await;
                (request.id.clone(), result, false)
            }
        });

        let mut results = Vec::with_capacity(invocation.requests.len());
        let mut errors: Vec<String> = Vec::new();
        let mut successful = 0usize;
        let mut any_cancelled = false;

        for (id, result, cancelled) in join_all(futures).await {
            any_cancelled |= cancelled;
            match result {
                Ok(element_results) => {
                    successful += 1;
                    results.push(SkillRequestResult {
                        id,
                        results: element_results,
                    });
                },
                Err(message) => {
                    if !cancelled {
                        warn!(key, element = %id, %message, "skill element failed");
                        errors.push(message);
                    }
                    results.push(SkillRequestResult {
                        id,
                        results: Vec::new(),
                    });
                },
            }
        }

        if any_cancelled && successful == 0 {
            return Ok(SkillOutcome::cancelled());
        }

        // Billing: per successful element, skipped for free skills.
        if successful > 0
            && let Some(hook) = &self.charge_hook
            && let Some(credits) = spec.pricing_credits.filter(|c| *c > 0)
            && let Some(user_id) = &invocation.context.user_id
        {
            hook.charge(user_id, app_id, &spec.id, credits * successful as i64)
                .await;
        }

        Ok(SkillOutcome {
            results,
            error: (!errors.is_empty()).then(|| errors.join("; ")),
            cancelled: false,
        })
    }
}

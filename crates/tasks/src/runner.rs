//! The ask runner.
//!
//! Produces one assistant message per task: loads the chat's inference
//! history (transit-wrapped copies, unwrapped only to feed the model),
//! resolves model routing, drives the provider stream, dispatches tool
//! calls into the skill fabric, and publishes chunks to the user's
//! devices. Cancellation flags are checked before each provider call,
//! between streamed chunks, and before each skill dispatch.

use std::{collections::HashMap, sync::Arc, time::Duration};

use {futures::StreamExt, tracing::{debug, error, info, warn}, uuid::Uuid};

use veil_billing::{ChargeLedger, charge::record_usage};
use veil_protocol::{ErrorShape, FOCUS_AUTO_CONFIRM_SECONDS, ServerEvent};
use veil_providers::{
    ChatMessage, ChatProvider, CompletionRequest, ProviderError, ProviderRegistry,
    UnifiedStreamChunk, ensure_final_usage,
};
use veil_routing::{ModelSelector, SelectionInput, parse_overrides, validate_model_override};
use veil_skills::{
    SkillFabric, SkillInvocation, SkillRegistry,
    types::{SkillContext, SkillRequest},
};
use veil_store::{
    CacheTier, DurableStore,
    types::{
        InferenceMessage, MessageRecord, MessageRole, MessageStatus, PendingFocusActivation,
        TaskState,
    },
};
use veil_common::{now_unix_secs, sha256_hex};
use veil_vault::TransitVault;

use crate::{
    Result, TaskError,
    events::UserEventBus,
    queue::{QUEUE_APP_AI, TaskQueue},
    types::{AskTaskRequest, RunOutcome},
};

/// Upper bound on provider→skill→provider rounds per task.
const MAX_TOOL_ROUNDS: usize = 8;

/// Tool name the model calls to propose a focus mode.
const FOCUS_TOOL_NAME: &str = "ai-activate_focus";

/// Tool name the model calls to ask the client for app settings or
/// memories it wants disclosed this turn.
const SETTINGS_TOOL_NAME: &str = "ai-request_settings";

/// Everything the runner borrows from the process, wired once at startup.
pub struct RunnerDeps {
    pub cache: Arc<CacheTier>,
    pub durable: Arc<dyn DurableStore>,
    pub vault: Arc<TransitVault>,
    pub providers: Arc<ProviderRegistry>,
    pub selector: Arc<ModelSelector>,
    pub skills: Arc<SkillRegistry>,
    pub fabric: Arc<SkillFabric>,
    pub ledger: Arc<ChargeLedger>,
    pub events: UserEventBus,
    pub queue: TaskQueue,
}

pub struct AskRunner {
    deps: RunnerDeps,
}

impl AskRunner {
    pub fn new(deps: RunnerDeps) -> Self {
        Self { deps }
    }

    /// Spawn the worker loop for the AI app queue.
    pub fn spawn_worker(
        runner: Arc<AskRunner>,
        mut receiver: tokio::sync::mpsc::UnboundedReceiver<AskTaskRequest>,
    ) {
        tokio::spawn(async move {
            while let Some(request) = receiver.recv().await {
                let runner = Arc::clone(&runner);
                tokio::spawn(async move {
                    let task_id = request.task_id.clone();
                    if let Err(e) = runner.run(request).await {
                        error!(task_id = %task_id, error = %e, "ask task crashed");
                    }
                });
            }
            debug!("ask worker channel closed");
        });
    }

    /// Run one task to a terminal outcome, publishing lifecycle events.
    pub async fn run(&self, request: AskTaskRequest) -> Result<RunOutcome> {
        let deps = &self.deps;
        deps.cache
            .set_active_ai_task(&request.chat_id, &request.task_id)
            .await;
        deps.cache
            .set_task_state(&request.task_id, TaskState::Running)
            .await;
        info!(task_id = %request.task_id, chat_id = %request.chat_id, "ask task running");

        let outcome = match self.run_inner(&request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(task_id = %request.task_id, error = %e, "ask task failed");
                RunOutcome::Failed {
                    message: "Failed to process message".into(),
                }
            },
        };

        let terminal_state = match &outcome {
            RunOutcome::Completed { .. } => TaskState::Completed,
            RunOutcome::Cancelled => TaskState::Cancelled,
            RunOutcome::ScheduledForRetry { .. } => TaskState::Scheduled,
            RunOutcome::Failed { .. } => TaskState::Failed,
        };
        deps.cache
            .set_task_state(&request.task_id, terminal_state)
            .await;

        match &outcome {
            RunOutcome::Completed {
                text,
                prompt_tokens,
                completion_tokens,
            } => {
                self.persist_reply(&request, text, MessageStatus::Completed).await;
                self.record_task_usage(&request, *prompt_tokens, *completion_tokens)
                    .await;
                deps.cache
                    .clear_active_ai_task(&request.chat_id, Some(&request.task_id))
                    .await;
                deps.cache.clear_task_flags(&request.task_id).await;
                deps.events.broadcast(&request.user_id, ServerEvent::AiTaskCompleted {
                    task_id: request.task_id.clone(),
                    chat_id: request.chat_id.clone(),
                    status: "completed".into(),
                });
            },
            RunOutcome::Cancelled => {
                self.persist_reply(&request, "", MessageStatus::Cancelled).await;
                deps.cache
                    .clear_active_ai_task(&request.chat_id, Some(&request.task_id))
                    .await;
                deps.cache.clear_task_flags(&request.task_id).await;
                deps.events.broadcast(&request.user_id, ServerEvent::AiTaskCompleted {
                    task_id: request.task_id.clone(),
                    chat_id: request.chat_id.clone(),
                    status: "cancelled".into(),
                });
            },
            RunOutcome::ScheduledForRetry { wait_time_seconds } => {
                deps.events.broadcast(&request.user_id, ServerEvent::AiTaskScheduled {
                    task_id: request.task_id.clone(),
                    chat_id: request.chat_id.clone(),
                    wait_time_seconds: *wait_time_seconds,
                });
                deps.queue.enqueue_after(
                    QUEUE_APP_AI,
                    request.clone(),
                    Duration::from_secs(*wait_time_seconds),
                );
            },
            RunOutcome::Failed { message } => {
                self.persist_reply(&request, "", MessageStatus::Failed).await;
                deps.cache
                    .clear_active_ai_task(&request.chat_id, Some(&request.task_id))
                    .await;
                deps.cache.clear_task_flags(&request.task_id).await;
                // Error toast only on the originating device; siblings
                // just see the task end.
                if let Some(device) = &request.origin_device_hash {
                    deps.events.send_to_device(
                        &request.user_id,
                        device,
                        ServerEvent::Error(ErrorShape::new(message.clone())),
                    );
                }
            },
        }

        Ok(outcome)
    }

    async fn run_inner(&self, request: &AskTaskRequest) -> Result<RunOutcome> {
        let deps = &self.deps;

        let vault_key_id = self.resolve_vault_key(request).await?;
        let mut messages = self.load_history(request, &vault_key_id).await?;
        if messages.is_empty() {
            return Err(TaskError::Message(format!(
                "no messages cached for chat {}",
                request.chat_id
            )));
        }

        let chain = self.resolve_model_chain(&mut messages);
        let mut tools = deps
            .skills
            .tools_for_preselection(request.preselected_skills.as_ref());
        if !request.is_focus_continuation {
            tools.push(focus_tool_definition());
        }
        tools.push(settings_tool_definition());

        if let Some(system) = self.system_prompt(request) {
            messages.insert(0, ChatMessage::system(system));
        }

        let mut total_prompt_tokens = 0u64;
        let mut total_completion_tokens = 0u64;
        let mut final_text = String::new();

        for round in 0..MAX_TOOL_ROUNDS {
            if deps.cache.is_task_revoked(&request.task_id).await {
                info!(task_id = %request.task_id, round, "task revoked before provider call");
                return Ok(RunOutcome::Cancelled);
            }

            let turn = match self.stream_one_turn(request, &chain, &messages, &tools).await? {
                TurnResult::Cancelled => return Ok(RunOutcome::Cancelled),
                TurnResult::Scheduled { wait_time_seconds } => {
                    return Ok(RunOutcome::ScheduledForRetry { wait_time_seconds });
                },
                TurnResult::Turn(turn) => turn,
            };

            total_prompt_tokens += turn.prompt_tokens;
            total_completion_tokens += turn.completion_tokens;

            if turn.tool_calls.is_empty() {
                final_text = turn.text;
                break;
            }

            // Record the assistant turn, then produce one tool reply per
            // call; the aggregation into parallel parts happens in the
            // provider normaliser.
            messages.push(ChatMessage::Assistant {
                content: (!turn.text.is_empty()).then(|| turn.text.clone()),
                tool_calls: turn
                    .tool_calls
                    .iter()
                    .cloned()
                    .map(Into::into)
                    .collect(),
            });

            for call in turn.tool_calls {
                if deps.cache.is_task_revoked(&request.task_id).await {
                    return Ok(RunOutcome::Cancelled);
                }
                let reply = if call.name == FOCUS_TOOL_NAME {
                    self.handle_focus_proposal(request, &call.arguments_parsed, &vault_key_id)
                        .await
                } else if call.name == SETTINGS_TOOL_NAME {
                    self.handle_settings_request(request, &call.arguments_parsed)
                } else {
                    self.dispatch_skill(request, &call.name, &call.arguments_parsed)
                        .await
                };
                messages.push(ChatMessage::Tool {
                    tool_call_id: call.tool_call_id,
                    name: call.name,
                    content: reply,
                });
            }

            if round + 1 == MAX_TOOL_ROUNDS {
                return Err(TaskError::Message("tool loop exceeded max rounds".into()));
            }
        }

        // The client encrypts and persists the final message; the server
        // keeps only the transit-wrapped inference copy for later turns.
        let wrapped = deps.vault.wrap_str(&vault_key_id, &final_text).await?;
        deps.cache
            .push_message(&request.chat_id, InferenceMessage {
                message_id: request.reply_message_id().to_string(),
                role: MessageRole::Assistant,
                wrapped_content: wrapped,
                created_at: now_unix_secs() as i64,
                sender_name: request.mate_id.clone(),
            })
            .await;

        Ok(RunOutcome::Completed {
            text: final_text,
            prompt_tokens: total_prompt_tokens,
            completion_tokens: total_completion_tokens,
        })
    }

    // ── History & routing ────────────────────────────────────────────────

    async fn resolve_vault_key(&self, request: &AskTaskRequest) -> Result<String> {
        let deps = &self.deps;
        if let Some(key) = deps.cache.get_user_vault_key_id(&request.user_id).await {
            return Ok(key);
        }
        let profile = deps
            .durable
            .get_profile(&request.user_id_hash)
            .await?
            .ok_or_else(|| {
                TaskError::Message(format!("no profile for user {}", request.user_id_hash))
            })?;
        deps.cache
            .set_user_vault_key_id(&request.user_id, &profile.vault_key_id)
            .await;
        Ok(profile.vault_key_id)
    }

    /// Newest-first cache history, reversed and unwrapped for inference.
    /// Rows that fail to unwrap are skipped rather than failing the turn.
    async fn load_history(
        &self,
        request: &AskTaskRequest,
        vault_key_id: &str,
    ) -> Result<Vec<ChatMessage>> {
        let deps = &self.deps;
        let cached = deps.cache.get_ai_messages_history(&request.chat_id).await;
        let mut messages = Vec::with_capacity(cached.len());
        for row in cached.into_iter().rev() {
            let content = match deps.vault.unwrap_str(vault_key_id, &row.wrapped_content).await {
                Ok(content) => content,
                Err(e) => {
                    warn!(message_id = %row.message_id, error = %e, "skipping undecryptable history row");
                    continue;
                },
            };
            match row.role {
                MessageRole::User => messages.push(ChatMessage::user(content)),
                MessageRole::Assistant => messages.push(ChatMessage::assistant_text(content)),
                MessageRole::System => {},
            }
        }
        Ok(messages)
    }

    /// Parse overrides out of the last user message and produce the model
    /// try-order. A valid `@ai-model` bypasses the selector entirely.
    fn resolve_model_chain(&self, messages: &mut Vec<ChatMessage>) -> Vec<String> {
        let deps = &self.deps;
        let Some(last_user) = messages
            .iter_mut()
            .rev()
            .find(|m| matches!(m, ChatMessage::User { .. }))
        else {
            return deps.selector.select(&SelectionInput::default()).try_order();
        };
        let ChatMessage::User { content } = last_user else {
            return deps.selector.select(&SelectionInput::default()).try_order();
        };

        let overrides = parse_overrides(content);
        if overrides.has_overrides {
            *content = overrides.cleaned_message.clone();
        }

        if let Some(model_id) = &overrides.model_id {
            let available: HashMap<String, Vec<String>> = deps
                .providers
                .list_models()
                .iter()
                .map(|m| (m.id.clone(), vec![m.provider.clone()]))
                .collect();
            if let Some((resolved, _)) =
                validate_model_override(model_id, overrides.model_provider.as_deref(), &available)
            {
                info!(model = %resolved, "selector bypassed by user override");
                return vec![resolved];
            }
        }

        deps.selector
            .select(&SelectionInput {
                available_model_ids: Some(deps.providers.model_ids()),
                ..Default::default()
            })
            .try_order()
    }

    fn system_prompt(&self, request: &AskTaskRequest) -> Option<String> {
        let mut sections = Vec::new();
        if let Some(mate_id) = &request.mate_id {
            sections.push(format!("You are the assistant persona \"{mate_id}\"."));
        }
        if let Some(focus_id) = &request.active_focus_id {
            sections.push(format!("Focus mode \"{focus_id}\" is active for this chat."));
        }
        if request.is_focus_continuation {
            sections.push(
                "The user declined the proposed focus mode. Continue without it.".to_string(),
            );
        }
        (!sections.is_empty()).then(|| sections.join("\n"))
    }

    // ── Streaming ────────────────────────────────────────────────────────

    /// Drive one provider turn across the model chain. Transient failures
    /// before the first visible chunk fall through to the next model.
    async fn stream_one_turn(
        &self,
        request: &AskTaskRequest,
        chain: &[String],
        messages: &[ChatMessage],
        tools: &[serde_json::Value],
    ) -> Result<TurnResult> {
        let deps = &self.deps;
        let mut last_error: Option<ProviderError> = None;

        for model_id in chain {
            let Some(provider) = deps.providers.get(model_id) else {
                debug!(model = %model_id, "model not in registry, trying next");
                continue;
            };

            match self
                .stream_from_provider(request, &provider, messages, tools)
                .await
            {
                StreamAttempt::Done(turn) => return Ok(TurnResult::Turn(turn)),
                StreamAttempt::Cancelled => return Ok(TurnResult::Cancelled),
                StreamAttempt::RateLimited { wait_time_seconds } => {
                    info!(
                        task_id = %request.task_id,
                        wait_time_seconds,
                        "provider rate limited, scheduling retry"
                    );
                    return Ok(TurnResult::Scheduled { wait_time_seconds });
                },
                StreamAttempt::Retryable(e) => {
                    warn!(model = %model_id, error = %e, "provider failed, trying next model");
                    last_error = Some(e);
                },
                StreamAttempt::Fatal(e) => return Err(e.into()),
            }
        }

        Err(last_error.map(TaskError::Provider).unwrap_or(TaskError::NoProvider))
    }

    async fn stream_from_provider(
        &self,
        request: &AskTaskRequest,
        provider: &Arc<dyn ChatProvider>,
        messages: &[ChatMessage],
        tools: &[serde_json::Value],
    ) -> StreamAttempt {
        let deps = &self.deps;
        let completion = CompletionRequest {
            model_id: provider.id().to_string(),
            messages: messages.to_vec(),
            tools: tools.to_vec(),
            tool_choice: None,
            temperature: None,
            max_tokens: None,
        };
        let prompt_chars = completion.prompt_chars();
        let mut stream = ensure_final_usage(provider.stream_chunks(completion), prompt_chars);

        let mut turn = Turn::default();
        let mut streamed_anything = false;
        let mut pending_signature: Option<String> = None;

        while let Some(item) = stream.next().await {
            // Cancellation check between streamed chunks.
            if deps.cache.is_task_revoked(&request.task_id).await {
                return StreamAttempt::Cancelled;
            }

            let chunk = match item {
                Ok(chunk) => chunk,
                Err(ProviderError::RateLimited { wait_time_seconds }) if !streamed_anything => {
                    return StreamAttempt::RateLimited { wait_time_seconds };
                },
                Err(e) if e.is_retryable() && !streamed_anything => {
                    return StreamAttempt::Retryable(e);
                },
                Err(e) => return StreamAttempt::Fatal(e),
            };

            match chunk {
                UnifiedStreamChunk::Text { content } => {
                    streamed_anything = true;
                    turn.text.push_str(&content);
                    deps.events.broadcast(&request.user_id, ServerEvent::AiTaskChunk {
                        task_id: request.task_id.clone(),
                        chat_id: request.chat_id.clone(),
                        kind: "text".into(),
                        content,
                    });
                },
                UnifiedStreamChunk::Thinking { content } => {
                    streamed_anything = true;
                    deps.events.broadcast(&request.user_id, ServerEvent::AiTaskChunk {
                        task_id: request.task_id.clone(),
                        chat_id: request.chat_id.clone(),
                        kind: "thinking".into(),
                        content,
                    });
                },
                UnifiedStreamChunk::ThinkingSignature { signature } => {
                    pending_signature = Some(signature);
                },
                UnifiedStreamChunk::ToolCall(mut call) => {
                    if call.thought_signature.is_none() {
                        call.thought_signature = pending_signature.clone();
                    }
                    turn.tool_calls.push(call);
                },
                UnifiedStreamChunk::ThinkingRedacted => {
                    debug!(task_id = %request.task_id, "provider redacted a thinking block");
                },
                UnifiedStreamChunk::Usage(usage) => {
                    turn.prompt_tokens += usage.prompt_tokens;
                    turn.completion_tokens += usage.completion_tokens;
                },
            }
        }

        StreamAttempt::Done(turn)
    }

    // ── Skills & focus ───────────────────────────────────────────────────

    /// Dispatch one tool call into the fabric; the serialized outcome is
    /// the tool reply. A cancelled skill yields a synthetic cancelled
    /// reply so the model continues without its data.
    async fn dispatch_skill(
        &self,
        request: &AskTaskRequest,
        tool_name: &str,
        arguments: &serde_json::Value,
    ) -> String {
        let skill_task_id = Uuid::new_v4().to_string();
        let invocation = build_invocation(arguments, SkillContext {
            user_id: Some(request.user_id.clone()),
            api_key_name: None,
            external_request: false,
            skill_task_id: Some(skill_task_id.clone()),
        });

        match self.deps.fabric.dispatch(tool_name, invocation).await {
            Ok(outcome) if outcome.cancelled => {
                serde_json::json!({ "status": "cancelled" }).to_string()
            },
            Ok(outcome) => serde_json::to_string(&outcome)
                .unwrap_or_else(|_| r#"{"error":"unserializable result"}"#.to_string()),
            Err(e) => {
                warn!(tool = tool_name, error = %e, "skill dispatch failed");
                serde_json::json!({ "error": e.to_string() }).to_string()
            },
        }
    }

    /// The model proposed a focus mode. Store the pending activation and
    /// start the auto-confirm countdown; whichever of {timer, client
    /// rejection} consumes the record first wins.
    async fn handle_focus_proposal(
        &self,
        request: &AskTaskRequest,
        arguments: &serde_json::Value,
        vault_key_id: &str,
    ) -> String {
        let deps = &self.deps;
        let focus_id = arguments["focus_id"].as_str().unwrap_or("unknown").to_string();

        deps.cache
            .put_pending_focus_activation(PendingFocusActivation {
                chat_id: request.chat_id.clone(),
                user_id: request.user_id.clone(),
                user_id_hash: request.user_id_hash.clone(),
                message_id: request.message_id.clone(),
                task_id: request.task_id.clone(),
                focus_id: focus_id.clone(),
                mate_id: request.mate_id.clone(),
                chat_has_title: request.chat_has_title,
                is_incognito: request.is_incognito,
            })
            .await;

        let cache = Arc::clone(&deps.cache);
        let durable = Arc::clone(&deps.durable);
        let vault = Arc::clone(&deps.vault);
        let vault_key_id = vault_key_id.to_string();
        let chat_id = request.chat_id.clone();
        let focus_for_timer = focus_id.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(FOCUS_AUTO_CONFIRM_SECONDS)).await;
            // Atomic get-and-delete: if the client rejected first, this
            // returns None and the timer does nothing.
            let Some(activation) = cache.get_and_delete_pending_focus_activation(&chat_id).await
            else {
                debug!(chat_id, "focus activation already consumed, auto-confirm is a no-op");
                return;
            };
            let wrapped = match vault.wrap_str(&vault_key_id, &activation.focus_id).await {
                Ok(wrapped) => wrapped,
                Err(e) => {
                    error!(chat_id, error = %e, "failed to wrap focus id");
                    return;
                },
            };
            cache
                .update_chat_active_focus_id(&chat_id, Some(wrapped.clone()))
                .await;
            if let Ok(Some(mut chat)) = durable.get_chat(&chat_id).await {
                chat.encrypted_active_focus_id = Some(wrapped);
                if let Err(e) = durable.upsert_chat(&chat).await {
                    error!(chat_id, error = %e, "failed to persist focus activation");
                }
            }
            info!(chat_id, focus_id = %focus_for_timer, "focus mode auto-confirmed");
        });

        serde_json::json!({
            "status": "activation_pending",
            "focus_id": focus_id,
            "auto_confirm_seconds": FOCUS_AUTO_CONFIRM_SECONDS,
        })
        .to_string()
    }

    /// The model wants client-held app settings or memories. The client
    /// answers out of band (the values are encrypted client-side); the
    /// tool reply just confirms the request went out.
    fn handle_settings_request(
        &self,
        request: &AskTaskRequest,
        arguments: &serde_json::Value,
    ) -> String {
        let requested_keys: Vec<String> = arguments["requested_keys"]
            .as_array()
            .map(|keys| {
                keys.iter()
                    .filter_map(|k| k.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();
        let request_id = Uuid::new_v4().to_string();
        let yaml_content = serde_yaml::to_string(&serde_json::json!({
            "type": "app_settings_memories_request",
            "request_id": request_id,
            "requested_keys": requested_keys,
        }))
        .unwrap_or_default();

        self.deps.events.broadcast(
            &request.user_id,
            ServerEvent::RequestAppSettingsMemories {
                request_id: request_id.clone(),
                chat_id: request.chat_id.clone(),
                requested_keys: requested_keys.clone(),
                yaml_content,
                message_id: request.reply_message_id().to_string(),
            },
        );

        serde_json::json!({
            "status": "requested",
            "request_id": request_id,
            "requested_keys": requested_keys,
        })
        .to_string()
    }

    // ── Persistence & accounting ─────────────────────────────────────────

    /// Record the assistant reply's terminal status. The body stays empty
    /// server-side for non-completed replies; completed bodies arrive
    /// client-encrypted through the router.
    async fn persist_reply(&self, request: &AskTaskRequest, _text: &str, status: MessageStatus) {
        if status == MessageStatus::Completed {
            return;
        }
        let message_id = request.reply_message_id().to_string();
        let record = MessageRecord {
            hashed_message_id: sha256_hex(&message_id),
            message_id,
            hashed_chat_id: sha256_hex(&request.chat_id),
            hashed_user_id: request.user_id_hash.clone(),
            role: MessageRole::Assistant,
            encrypted_content: String::new(),
            status: Some(status),
            created_at: now_unix_secs() as i64,
        };
        if let Err(e) = self.deps.durable.insert_message(&record).await {
            error!(task_id = %request.task_id, error = %e, "failed to persist reply status");
        }
    }

    async fn record_task_usage(
        &self,
        request: &AskTaskRequest,
        prompt_tokens: u64,
        completion_tokens: u64,
    ) {
        let deps = &self.deps;
        let Ok(vault_key_id) = self.resolve_vault_key(request).await else {
            return;
        };
        let model = deps
            .providers
            .list_models()
            .first()
            .map(|m| m.id.clone())
            .unwrap_or_default();

        // One credit per started thousand tokens; idempotent on task id so
        // a retried completion never double-charges.
        let credits = ((prompt_tokens + completion_tokens) as i64 + 999) / 1000;
        match deps
            .ledger
            .charge(&veil_billing::ChargeRequest {
                user_id_hash: request.user_id_hash.clone(),
                app_id: "ai".into(),
                skill_id: "ask".into(),
                credits,
                idempotency_key: Some(format!("ask:{}", request.task_id)),
                chat_id: Some(request.chat_id.clone()),
                message_id: Some(request.reply_message_id().to_string()),
            })
            .await
        {
            Ok(_) => {},
            Err(e) => warn!(task_id = %request.task_id, error = %e, "ask charge failed"),
        }

        if let Err(e) = record_usage(
            &deps.durable,
            &deps.vault,
            &vault_key_id,
            &request.user_id_hash,
            "ai",
            "ask",
            credits,
            &model,
            prompt_tokens,
            completion_tokens,
            Some(request.chat_id.clone()),
            Some(request.reply_message_id().to_string()),
            now_unix_secs() as i64,
        )
        .await
        {
            error!(task_id = %request.task_id, error = %e, "failed to record usage");
        }
    }
}

// ── Internals ────────────────────────────────────────────────────────────────

#[derive(Default)]
struct Turn {
    text: String,
    tool_calls: Vec<veil_providers::ParsedToolCall>,
    prompt_tokens: u64,
    completion_tokens: u64,
}

enum TurnResult {
    Turn(Turn),
    Cancelled,
    Scheduled { wait_time_seconds: u64 },
}

enum StreamAttempt {
    Done(Turn),
    Cancelled,
    RateLimited { wait_time_seconds: u64 },
    Retryable(ProviderError),
    Fatal(ProviderError),
}

/// Shape tool-call arguments into the fabric's `requests` contract. Bare
/// argument objects become a single request with the default id.
fn build_invocation(arguments: &serde_json::Value, context: SkillContext) -> SkillInvocation {
    if let Some(requests) = arguments.get("requests").and_then(|r| r.as_array()) {
        let requests = requests
            .iter()
            .filter_map(|r| serde_json::from_value::<SkillRequest>(r.clone()).ok())
            .collect();
        return SkillInvocation { requests, context };
    }

    let body = arguments
        .as_object()
        .cloned()
        .unwrap_or_default();
    SkillInvocation {
        requests: vec![SkillRequest {
            id: Default::default(),
            body,
        }],
        context,
    }
}

/// Settings/memories disclosure exposed to the model as a plain tool.
fn settings_tool_definition() -> serde_json::Value {
    serde_json::json!({
        "name": SETTINGS_TOOL_NAME,
        "description": "Ask the user's client to disclose specific app settings or \
            memories for this conversation. The values stay client-encrypted.",
        "parameters": {
            "type": "object",
            "properties": {
                "requested_keys": {
                    "type": "array",
                    "items": { "type": "string" }
                }
            },
            "required": ["requested_keys"]
        }
    })
}

/// Focus activation exposed to the model as a plain tool.
fn focus_tool_definition() -> serde_json::Value {
    serde_json::json!({
        "name": FOCUS_TOOL_NAME,
        "description": "Activate a focus mode for this conversation. The user can reject \
            the activation during a short countdown.",
        "parameters": {
            "type": "object",
            "properties": {
                "focus_id": { "type": "string" }
            },
            "required": ["focus_id"]
        }
    })
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use veil_billing::ChargeLedger;
    use veil_providers::{ProviderRegistry, ScriptedProvider, ScriptedTurn, TokenUsage};
    use veil_routing::{LeaderboardSnapshot, ModelSelector};
    use veil_skills::{NeverCancelled, SkillFabric, SkillRegistry};
    use veil_store::MemoryStore;
    use veil_store::types::UserProfile;

    async fn seed_user(deps: &RunnerDeps) {
        deps.vault.create_key("vk-u").await;
        deps.durable
            .upsert_profile(&UserProfile {
                user_id_hash: sha256_hex("u1"),
                vault_key_id: "vk-u".into(),
                email_notifications_enabled: false,
                encrypted_notification_email: None,
                notification_preferences: serde_json::Value::Null,
            })
            .await
            .unwrap();
    }

    async fn seed_history(deps: &RunnerDeps, chat_id: &str, content: &str) {
        let wrapped = deps.vault.wrap_str("vk-u", content).await.unwrap();
        deps.cache
            .push_message(chat_id, InferenceMessage {
                message_id: "m1".into(),
                role: MessageRole::User,
                wrapped_content: wrapped,
                created_at: 1,
                sender_name: None,
            })
            .await;
    }

    fn request(task_id: &str, chat_id: &str) -> AskTaskRequest {
        AskTaskRequest {
            task_id: task_id.into(),
            chat_id: chat_id.into(),
            user_id: "u1".into(),
            user_id_hash: sha256_hex("u1"),
            message_id: "m1".into(),
            mate_id: None,
            active_focus_id: None,
            chat_has_title: false,
            is_incognito: false,
            preselected_skills: Some(Default::default()),
            is_focus_continuation: false,
            continuation_message_id: None,
            origin_device_hash: None,
        }
    }

    fn deps_with_provider(
        provider: ScriptedProvider,
    ) -> (RunnerDeps, tokio::sync::mpsc::UnboundedReceiver<crate::events::OutboundEvent>) {
        let mut providers = ProviderRegistry::new();
        providers.register(
            veil_providers::ModelInfo {
                id: "scripted-model".into(),
                provider: "scripted".into(),
                display_name: "Scripted".into(),
            },
            Arc::new(provider),
        );
        let registry = Arc::new(SkillRegistry::new(false));
        let (events, receiver) = UserEventBus::channel();
        let deps = RunnerDeps {
            cache: Arc::new(CacheTier::new()),
            durable: Arc::new(MemoryStore::new()),
            vault: Arc::new(TransitVault::new()),
            providers: Arc::new(providers),
            selector: Arc::new(ModelSelector::new(LeaderboardSnapshot {
                rankings: vec![veil_routing::LeaderboardEntry {
                    model_id: "scripted-model".into(),
                    provider_id: "scripted".into(),
                    score: 1.0,
                    country_origin: None,
                    allow_auto_select: true,
                }],
            })),
            skills: Arc::clone(&registry),
            fabric: Arc::new(SkillFabric::new(registry, Arc::new(NeverCancelled))),
            ledger: Arc::new(ChargeLedger::new(false)),
            events,
            queue: TaskQueue::new(),
        };
        (deps, receiver)
    }

    #[tokio::test]
    async fn streams_text_and_completes() {
        let (deps, mut events) = deps_with_provider(ScriptedProvider::new(
            "scripted-model",
            vec![ScriptedTurn::text("hello world")],
        ));
        seed_user(&deps).await;
        seed_history(&deps, "c1", "hi").await;

        let runner = AskRunner::new(deps);
        let outcome = runner.run(request("t1", "c1")).await.unwrap();

        let RunOutcome::Completed { text, .. } = outcome else {
            panic!("expected completion, got {outcome:?}");
        };
        assert_eq!(text, "hello world");

        // Chunk event then completion event.
        let first = events.recv().await.unwrap();
        assert!(matches!(
            first.event,
            ServerEvent::AiTaskChunk { ref kind, .. } if kind == "text"
        ));
        let second = events.recv().await.unwrap();
        assert!(matches!(
            second.event,
            ServerEvent::AiTaskCompleted { ref status, .. } if status == "completed"
        ));

        // The inference copy landed in the cache, wrapped.
        let history = runner.deps.cache.get_ai_messages_history("c1").await;
        assert_eq!(history.len(), 2);
        assert!(history[0].wrapped_content.starts_with("vault:v1:"));
    }

    #[tokio::test]
    async fn pre_revoked_task_cancels_before_streaming() {
        let (deps, mut events) = deps_with_provider(ScriptedProvider::new(
            "scripted-model",
            vec![ScriptedTurn::text("never seen")],
        ));
        seed_user(&deps).await;
        seed_history(&deps, "c1", "hi").await;
        deps.cache.revoke_task("t1").await;

        let runner = AskRunner::new(deps);
        let outcome = runner.run(request("t1", "c1")).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Cancelled));

        // No text chunks; straight to the cancelled lifecycle event.
        let event = events.recv().await.unwrap();
        assert!(matches!(
            event.event,
            ServerEvent::AiTaskCompleted { ref status, .. } if status == "cancelled"
        ));

        // The reply row carries cancelled status.
        let messages = runner
            .deps
            .durable
            .get_messages(&sha256_hex("c1"))
            .await
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].status, Some(MessageStatus::Cancelled));
        assert!(messages[0].encrypted_content.is_empty());
    }

    #[tokio::test]
    async fn rate_limit_schedules_retry() {
        let (deps, mut events) = deps_with_provider(ScriptedProvider::new(
            "scripted-model",
            vec![ScriptedTurn {
                chunks: vec![],
                error: Some(ProviderError::RateLimited {
                    wait_time_seconds: 42,
                }),
            }],
        ));
        seed_user(&deps).await;
        seed_history(&deps, "c1", "hi").await;

        let runner = AskRunner::new(deps);
        let outcome = runner.run(request("t1", "c1")).await.unwrap();
        assert!(matches!(
            outcome,
            RunOutcome::ScheduledForRetry {
                wait_time_seconds: 42
            }
        ));

        let event = events.recv().await.unwrap();
        assert!(matches!(
            event.event,
            ServerEvent::AiTaskScheduled {
                wait_time_seconds: 42,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn model_override_bypasses_selector() {
        let (deps, _events) = deps_with_provider(ScriptedProvider::new(
            "scripted-model",
            vec![ScriptedTurn::text("ok")],
        ));
        seed_user(&deps).await;
        seed_history(&deps, "c1", "answer this @ai-model:scripted-model").await;

        let runner = AskRunner::new(deps);
        let outcome = runner.run(request("t1", "c1")).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Completed { .. }));
    }

    #[tokio::test]
    async fn focus_rejection_beats_auto_confirm() {
        tokio::time::pause();
        let (deps, _events) = deps_with_provider(ScriptedProvider::new(
            "scripted-model",
            vec![
                ScriptedTurn {
                    chunks: vec![
                        UnifiedStreamChunk::ToolCall(veil_providers::ParsedToolCall {
                            tool_call_id: "tc1".into(),
                            name: FOCUS_TOOL_NAME.into(),
                            arguments_parsed: serde_json::json!({ "focus_id": "deep-research" }),
                            arguments_raw: String::new(),
                            thought_signature: None,
                        }),
                        UnifiedStreamChunk::Usage(TokenUsage::default()),
                    ],
                    error: None,
                },
                ScriptedTurn::text("continuing"),
            ],
        ));
        seed_user(&deps).await;
        seed_history(&deps, "c1", "hi").await;

        let cache = Arc::clone(&deps.cache);
        let runner = AskRunner::new(deps);
        let outcome = runner.run(request("t1", "c1")).await.unwrap();
        assert!(matches!(outcome, RunOutcome::Completed { .. }));

        // Client rejection consumes the record before the 4s timer.
        tokio::time::advance(Duration::from_secs(1)).await;
        let consumed = cache.get_and_delete_pending_focus_activation("c1").await;
        assert!(consumed.is_some());
        assert_eq!(consumed.unwrap().focus_id, "deep-research");

        // The timer fires into nothing.
        tokio::time::advance(Duration::from_secs(4)).await;
        tokio::task::yield_now().await;
        assert!(cache.get_and_delete_pending_focus_activation("c1").await.is_none());
    }
}

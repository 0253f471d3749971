//! Task lifecycle handlers: whole-task revoke, per-skill cancel, and the
//! focus-mode rejection race.

use tracing::{info, warn};
use uuid::Uuid;

use veil_protocol::{
    CancelAiTaskPayload, CancelSkillPayload, FocusModeRejectedPayload, ServerEvent,
};
use veil_store::types::EmbedStatus;
use veil_tasks::{AskTaskRequest, queue::QUEUE_APP_AI};

use crate::{Result, router::EventContext};

/// Whole-task revoke: mark the flag and drop the typing indicator
/// immediately; the runner observes the flag at its next safe point.
pub async fn handle_cancel_ai_task(
    ctx: &EventContext,
    payload: CancelAiTaskPayload,
) -> Result<()> {
    ctx.ensure_chat_ownership(&payload.chat_id).await?;
    let state = &ctx.state;

    state.cache.revoke_task(&payload.task_id).await;
    state
        .cache
        .clear_active_ai_task(&payload.chat_id, Some(&payload.task_id))
        .await;

    info!(task_id = %payload.task_id, chat_id = %payload.chat_id, "ai task revocation sent");
    ctx.reply(ServerEvent::AiTaskCancelRequested {
        task_id: payload.task_id,
        status: "revocation_sent".into(),
    })
    .await;
    Ok(())
}

/// Per-skill cancel: only the one sub-execution stops; the parent task
/// keeps running and receives a synthetic cancelled tool reply.
pub async fn handle_cancel_skill(ctx: &EventContext, payload: CancelSkillPayload) -> Result<()> {
    let state = &ctx.state;
    state.cache.cancel_skill(&payload.skill_task_id).await;

    // An embed tracking this skill's output moves to cancelled, and every
    // device hears about it.
    if let Some(embed_id) = &payload.embed_id
        && let Some(mut embed) = state.cache.get_embed(embed_id).await
    {
        if embed.status.can_transition_to(EmbedStatus::Cancelled) {
            embed.status = EmbedStatus::Cancelled;
            state.cache.upsert_embed(embed.clone()).await;
            state.durable.upsert_embed(&embed).await?;
            ctx.notify_all(ServerEvent::EmbedUpdate {
                embed_id: embed_id.clone(),
                status: "cancelled".into(),
                child_embed_ids: embed.child_embed_ids.clone(),
            })
            .await;
        } else {
            warn!(embed_id, status = ?embed.status, "embed already terminal, not cancelling");
        }
    }

    ctx.reply(ServerEvent::SkillCancelRequested {
        skill_task_id: payload.skill_task_id,
        status: "revocation_sent".into(),
    })
    .await;
    Ok(())
}

/// The user rejected a proposed focus mode during the countdown.
///
/// Atomically consumes the pending activation. If we got it before the
/// auto-confirm timer, a continuation task re-fires without focus, reusing
/// the original task id as the assistant message id so the continuation
/// replaces the same bubble. If the timer won, fall back to deactivating
/// the now-active focus mode.
pub async fn handle_focus_mode_rejected(
    ctx: &EventContext,
    payload: FocusModeRejectedPayload,
) -> Result<()> {
    let state = &ctx.state;
    let pending = state
        .cache
        .get_and_delete_pending_focus_activation(&payload.chat_id)
        .await;
    let caught_before_activation = pending.is_some();

    match pending {
        Some(pending) => {
            info!(
                chat_id = %payload.chat_id,
                focus_id = %payload.focus_id,
                original_task = %pending.task_id,
                "focus rejected before auto-confirm, firing continuation"
            );
            let request = AskTaskRequest {
                task_id: Uuid::new_v4().to_string(),
                chat_id: pending.chat_id,
                user_id: pending.user_id,
                user_id_hash: pending.user_id_hash,
                message_id: pending.message_id,
                mate_id: pending.mate_id,
                active_focus_id: None,
                chat_has_title: pending.chat_has_title,
                is_incognito: pending.is_incognito,
                preselected_skills: Some(state.skills.keys().into_iter().collect()),
                is_focus_continuation: true,
                continuation_message_id: Some(pending.task_id),
                origin_device_hash: Some(ctx.device_hash.clone()),
            };
            state.queue.enqueue(QUEUE_APP_AI, request).await;
        },
        None => {
            info!(
                chat_id = %payload.chat_id,
                focus_id = %payload.focus_id,
                "pending activation already consumed, deactivating focus"
            );
            state
                .cache
                .update_chat_active_focus_id(&payload.chat_id, None)
                .await;
            if let Some(mut chat) = state.durable.get_chat(&payload.chat_id).await? {
                chat.encrypted_active_focus_id = None;
                state.durable.upsert_chat(&chat).await?;
            }
        },
    }

    ctx.reply(ServerEvent::FocusModeRejectedAck {
        chat_id: payload.chat_id,
        focus_id: payload.focus_id,
        status: "rejected".into(),
        caught_before_activation,
    })
    .await;
    Ok(())
}

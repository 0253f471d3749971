//! WebSocket message router.
//!
//! Single entry point per connection: every inbound frame is parsed into
//! a [`ClientEvent`] and dispatched to its typed handler. Handler errors
//! surface as a coarse `error` event on the originating device only;
//! detailed causes go to the log.

use std::sync::Arc;

use tracing::{error, info, warn};

use veil_protocol::{ClientEvent, ErrorShape, ServerEvent};
use veil_store::{OwnershipStatus, check_chat_ownership};

use crate::{GatewayError, Result, handlers, state::GatewayState};

/// Per-connection identity and shared state, passed to every handler.
pub struct EventContext {
    pub state: Arc<GatewayState>,
    pub user_id: String,
    pub user_id_hash: String,
    pub device_hash: String,
}

impl EventContext {
    /// Every state-mutating handler calls this before any cache or
    /// durable write. A chat that does not exist yet is a local-first
    /// chat and is permitted; the first write binds the owner.
    pub async fn ensure_chat_ownership(&self, chat_id: &str) -> Result<OwnershipStatus> {
        let status = check_chat_ownership(
            &self.state.cache,
            &self.state.durable,
            &self.user_id_hash,
            chat_id,
        )
        .await?;
        if !status.is_permitted() {
            warn!(
                user = %self.user_id_hash,
                chat_id,
                "ownership check failed"
            );
            return Err(GatewayError::Unauthorized);
        }
        Ok(status)
    }

    /// The user's transit key id, cache-first.
    pub async fn vault_key_id(&self) -> Result<String> {
        if let Some(key) = self.state.cache.get_user_vault_key_id(&self.user_id).await {
            return Ok(key);
        }
        let profile = self
            .state
            .durable
            .get_profile(&self.user_id_hash)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("profile {}", self.user_id_hash)))?;
        self.state
            .cache
            .set_user_vault_key_id(&self.user_id, &profile.vault_key_id)
            .await;
        Ok(profile.vault_key_id)
    }

    /// Push an event to this connection's device only.
    pub async fn reply(&self, event: ServerEvent) {
        self.state
            .connections
            .send_personal_message(&self.user_id, &self.device_hash, &event)
            .await;
    }

    /// Broadcast to the user's other devices.
    pub async fn notify_siblings(&self, event: ServerEvent) {
        self.state
            .connections
            .broadcast_to_user(&self.user_id, &event, Some(&self.device_hash))
            .await;
    }

    /// Broadcast to every device including this one.
    pub async fn notify_all(&self, event: ServerEvent) {
        self.state
            .connections
            .broadcast_to_user(&self.user_id, &event, None)
            .await;
    }
}

/// Dispatch one inbound event. Never returns an error to the socket
/// loop; failures become `error` events for this device.
pub async fn dispatch(ctx: &EventContext, event: ClientEvent) {
    let kind = event.kind();
    info!(user = %ctx.user_id_hash, device = %ctx.device_hash, event = kind, "ws event");

    let result = match event {
        ClientEvent::MessageReceived(payload) => {
            handlers::chat::handle_message_received(ctx, payload).await
        },
        ClientEvent::CancelAiTask(payload) => {
            handlers::tasks::handle_cancel_ai_task(ctx, payload).await
        },
        ClientEvent::CancelSkill(payload) => {
            handlers::tasks::handle_cancel_skill(ctx, payload).await
        },
        ClientEvent::FocusModeRejected(payload) => {
            handlers::tasks::handle_focus_mode_rejected(ctx, payload).await
        },
        ClientEvent::StoreEmbed(payload) => {
            handlers::embeds::handle_store_embed(ctx, payload).await
        },
        ClientEvent::StoreEmbedKeys(payload) => {
            handlers::embeds::handle_store_embed_keys(ctx, payload).await
        },
        ClientEvent::RequestEmbed(payload) => {
            handlers::embeds::handle_request_embed(ctx, payload).await
        },
        ClientEvent::DeleteMessage(payload) => {
            handlers::chat::handle_delete_message(ctx, payload).await
        },
        ClientEvent::DeleteNewChatSuggestion(payload) => {
            handlers::chat::handle_delete_new_chat_suggestion(ctx, payload).await
        },
        ClientEvent::EmailNotificationSettings(payload) => {
            handlers::settings::handle_email_notification_settings(ctx, payload).await
        },
        ClientEvent::ChatSystemMessageAdded(payload) => {
            handlers::chat::handle_system_message(ctx, payload).await
        },
        ClientEvent::LoadMoreChats(payload) => {
            handlers::chat::handle_load_more_chats(ctx, payload).await
        },
        ClientEvent::SetActiveChat(payload) => {
            ctx.state
                .connections
                .set_active_chat(&ctx.user_id, &ctx.device_hash, payload.chat_id)
                .await;
            Ok(())
        },
    };

    if let Err(e) = result {
        error!(user = %ctx.user_id_hash, event = kind, error = %e, "handler failed");
        let shape = match e {
            GatewayError::Unauthorized => ErrorShape::new("Not allowed"),
            GatewayError::NotFound(_) => ErrorShape::new("Not found"),
            _ => ErrorShape::with_details("Failed to process message", kind),
        };
        ctx.reply(ServerEvent::Error(shape)).await;
    }
}

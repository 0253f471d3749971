//! Settings handlers.

use tracing::info;

use veil_protocol::{EmailNotificationSettingsPayload, ServerEvent};
use veil_store::types::UserProfile;

use crate::{Result, router::EventContext};

/// Email notification preferences. The address is re-encrypted under the
/// user's transit key server-side before it is stored anywhere.
pub async fn handle_email_notification_settings(
    ctx: &EventContext,
    payload: EmailNotificationSettingsPayload,
) -> Result<()> {
    let state = &ctx.state;
    let vault_key_id = ctx.vault_key_id().await?;

    let encrypted_email = match payload.email.as_deref() {
        Some(email) if !email.is_empty() => {
            Some(state.vault.wrap_str(&vault_key_id, email).await?)
        },
        _ => None,
    };

    let mut profile = state
        .durable
        .get_profile(&ctx.user_id_hash)
        .await?
        .unwrap_or_else(|| UserProfile {
            user_id_hash: ctx.user_id_hash.clone(),
            vault_key_id: vault_key_id.clone(),
            email_notifications_enabled: false,
            encrypted_notification_email: None,
            notification_preferences: serde_json::Value::Null,
        });

    profile.email_notifications_enabled = payload.enabled;
    if encrypted_email.is_some() {
        profile.encrypted_notification_email = encrypted_email;
    }
    profile.notification_preferences = serde_json::Value::Object(payload.preferences);
    state.durable.upsert_profile(&profile).await?;

    info!(user = %ctx.user_id_hash, enabled = payload.enabled, "email settings updated");
    ctx.reply(ServerEvent::EmailNotificationSettingsAck {
        status: "saved".into(),
    })
    .await;
    ctx.notify_siblings(ServerEvent::EmailNotificationSettingsUpdated {
        enabled: payload.enabled,
    })
    .await;
    Ok(())
}

//! Event-bus fan-out loop.
//!
//! The runner publishes outbound events without knowing about sockets;
//! this loop delivers them through the connection manager. Broadcast
//! fan-out is best-effort per device — a failing device gets its own
//! disconnect, siblings are unaffected.

use tokio::sync::mpsc;
use tracing::debug;

use veil_protocol::ServerEvent;
use veil_tasks::OutboundEvent;

use crate::connections::ConnectionManager;

/// Drain the bus until every sender is gone.
pub fn spawn_fanout(
    connections: ConnectionManager,
    mut receiver: mpsc::UnboundedReceiver<OutboundEvent>,
) {
    tokio::spawn(async move {
        while let Some(outbound) = receiver.recv().await {
            // Task completions for a fully offline user (no socket, no
            // grace timer) are where optional notification delivery would
            // hook in; the fan-out itself is a no-op then.
            if matches!(outbound.event, ServerEvent::AiTaskCompleted { .. })
                && !connections.is_user_active(&outbound.user_id).await
            {
                debug!(user = %outbound.user_id, "task finished for inactive user");
            }

            match (&outbound.only_device_hash, &outbound.exclude_device_hash) {
                (Some(device), _) => {
                    connections
                        .send_personal_message(&outbound.user_id, device, &outbound.event)
                        .await;
                },
                (None, exclude) => {
                    connections
                        .broadcast_to_user(&outbound.user_id, &outbound.event, exclude.as_deref())
                        .await;
                },
            }
        }
        debug!("event bus closed, fan-out loop exiting");
    });
}

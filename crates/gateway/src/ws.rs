//! WebSocket connection lifecycle: register with the connection manager,
//! pump frames both ways, dispatch inbound events to the router.

use std::sync::Arc;

use {
    axum::extract::ws::{Message, WebSocket},
    futures::{SinkExt, stream::StreamExt},
    tracing::{debug, info, warn},
};

use veil_common::sha256_hex;
use veil_protocol::{ClientEvent, ErrorShape, MAX_PAYLOAD_BYTES, ServerEvent};

use crate::{router, router::EventContext, state::GatewayState};

/// Handle one authenticated WebSocket connection through its lifecycle.
/// Identity (`user_id`, `device_fingerprint_hash`) arrives resolved by
/// the auth layer in front of us.
pub async fn handle_connection(
    socket: WebSocket,
    state: Arc<GatewayState>,
    user_id: String,
    device_hash: String,
) {
    let user_id_hash = sha256_hex(&user_id);
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (socket_id, mut outbound) = state.connections.connect(&user_id, &device_hash).await;
    info!(user = %user_id_hash, device = %device_hash, socket_id, "ws connected");

    // Write loop: drain the connection manager's channel into the socket.
    let write_handle = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if ws_tx.send(Message::Text(frame.into())).await.is_err() {
                debug!(socket_id, "ws write loop closed");
                break;
            }
        }
    });

    let ctx = EventContext {
        state: Arc::clone(&state),
        user_id: user_id.clone(),
        user_id_hash: user_id_hash.clone(),
        device_hash: device_hash.clone(),
    };

    // Read loop.
    while let Some(message) = ws_rx.next().await {
        let text = match message {
            Ok(Message::Text(t)) => t.to_string(),
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                debug!(socket_id, error = %e, "ws read error");
                break;
            },
        };

        if text.len() > MAX_PAYLOAD_BYTES {
            warn!(socket_id, size = text.len(), "ws payload too large");
            ctx.reply(ServerEvent::Error(ErrorShape::new("payload too large")))
                .await;
            continue;
        }

        let event: ClientEvent = match serde_json::from_str(&text) {
            Ok(event) => event,
            Err(e) => {
                warn!(socket_id, error = %e, "ws invalid event");
                ctx.reply(ServerEvent::Error(ErrorShape::new("invalid event")))
                    .await;
                continue;
            },
        };

        router::dispatch(&ctx, event).await;
    }

    // Socket gone; session state survives the grace period.
    state.connections.disconnect(socket_id, "socket closed").await;
    write_handle.abort();
    info!(user = %user_id_hash, device = %device_hash, socket_id, "ws closed");
}

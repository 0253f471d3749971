//! Per-user outbound event bus.
//!
//! The runner never talks to the connection manager directly; it
//! publishes [`OutboundEvent`]s here and the gateway's fan-out loop
//! subscribes. That breaks the connection-manager/runner cycle.

use tokio::sync::mpsc;
use tracing::debug;

use veil_protocol::ServerEvent;

/// One event addressed to all of a user's devices (optionally excluding
/// the originating one).
#[derive(Debug)]
pub struct OutboundEvent {
    pub user_id: String,
    pub exclude_device_hash: Option<String>,
    /// Deliver only to this device (overrides broadcast).
    pub only_device_hash: Option<String>,
    pub event: ServerEvent,
}

/// Publisher half of the bus. Cloneable; the gateway owns the receiver.
#[derive(Clone)]
pub struct UserEventBus {
    sender: mpsc::UnboundedSender<OutboundEvent>,
}

impl UserEventBus {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<OutboundEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    /// Broadcast to all of the user's devices.
    pub fn broadcast(&self, user_id: &str, event: ServerEvent) {
        self.publish(OutboundEvent {
            user_id: user_id.to_string(),
            exclude_device_hash: None,
            only_device_hash: None,
            event,
        });
    }

    /// Broadcast, excluding the sending device.
    pub fn broadcast_excluding(
        &self,
        user_id: &str,
        exclude_device_hash: Option<&str>,
        event: ServerEvent,
    ) {
        self.publish(OutboundEvent {
            user_id: user_id.to_string(),
            exclude_device_hash: exclude_device_hash.map(Into::into),
            only_device_hash: None,
            event,
        });
    }

    /// Deliver to exactly one device (error toasts stay on the
    /// originating device).
    pub fn send_to_device(&self, user_id: &str, device_hash: &str, event: ServerEvent) {
        self.publish(OutboundEvent {
            user_id: user_id.to_string(),
            exclude_device_hash: None,
            only_device_hash: Some(device_hash.to_string()),
            event,
        });
    }

    fn publish(&self, event: OutboundEvent) {
        if self.sender.send(event).is_err() {
            debug!("event bus receiver dropped, discarding outbound event");
        }
    }
}

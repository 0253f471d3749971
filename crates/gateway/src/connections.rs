//! Device-aware connection manager.
//!
//! Tracks `user_id → (device_hash → socket)` with a reverse index by
//! socket identity, per-device active-chat tracking, and a reconnection
//! grace period: a disconnected device keeps its session state for
//! [`GRACE_PERIOD_SECONDS`](veil_protocol::GRACE_PERIOD_SECONDS) so a
//! transient network drop does not flicker the UI. Only the socket
//! identity that triggered a disconnect may tear the session down — a
//! newer socket at the same key always wins.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    tokio::sync::{RwLock, mpsc},
    tracing::{debug, info, warn},
};

use veil_protocol::ServerEvent;

/// Identity key for one device of one user.
type ConnKey = (String, String);

/// A live socket's send handle plus its identity.
#[derive(Debug, Clone)]
struct DeviceSocket {
    socket_id: u64,
    sender: mpsc::UnboundedSender<String>,
}

struct GraceTimer {
    /// The socket whose disconnect started this timer.
    socket_id: u64,
    handle: tokio::task::JoinHandle<()>,
}

#[derive(Default)]
struct ConnInner {
    active: HashMap<String, HashMap<String, DeviceSocket>>,
    reverse: HashMap<u64, ConnKey>,
    active_chat: HashMap<ConnKey, Option<String>>,
    grace: HashMap<ConnKey, GraceTimer>,
}

/// Shared connection manager. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<RwLock<ConnInner>>,
    next_socket_id: Arc<AtomicU64>,
    grace_period: Duration,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::with_grace_period(Duration::from_secs(veil_protocol::GRACE_PERIOD_SECONDS))
    }

    pub fn with_grace_period(grace_period: Duration) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ConnInner::default())),
            next_socket_id: Arc::new(AtomicU64::new(1)),
            grace_period,
        }
    }

    // ── Connect / disconnect ─────────────────────────────────────────────

    /// Register a device connection. Returns the socket id and the
    /// receiver its write loop drains.
    ///
    /// A reconnect within the grace window cancels the pending removal
    /// and keeps the device's active-chat state untouched. A previous
    /// socket at the same key loses its reverse-lookup entry but is not
    /// forcibly closed here.
    pub async fn connect(
        &self,
        user_id: &str,
        device_hash: &str,
    ) -> (u64, mpsc::UnboundedReceiver<String>) {
        let socket_id = self.next_socket_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();
        let key: ConnKey = (user_id.to_string(), device_hash.to_string());

        let mut inner = self.inner.write().await;

        if let Some(timer) = inner.grace.remove(&key) {
            timer.handle.abort();
            info!(user_id, device_hash, "reconnected within grace, pending removal cancelled");
        }

        if let Some(old) = inner
            .active
            .get(user_id)
            .and_then(|devices| devices.get(device_hash))
            .map(|s| s.socket_id)
        {
            if old != socket_id {
                inner.reverse.remove(&old);
                debug!(user_id, device_hash, old_socket = old, "cleared stale reverse lookup");
            }
        }

        inner
            .active
            .entry(user_id.to_string())
            .or_default()
            .insert(device_hash.to_string(), DeviceSocket { socket_id, sender });
        inner.reverse.insert(socket_id, key.clone());

        // Preserve active chat across reconnects; only brand-new keys
        // start with no active chat.
        if !inner.active_chat.contains_key(&key) {
            inner.active_chat.insert(key, None);
            info!(user_id, device_hash, socket_id, "device connected");
        } else {
            info!(user_id, device_hash, socket_id, "device re-established");
        }

        (socket_id, receiver)
    }

    /// Begin the disconnect sequence for one socket. State is not removed
    /// here; a grace timer is scheduled, and removal happens only if the
    /// timer fires while this socket is still the one at its key.
    pub async fn disconnect(&self, socket_id: u64, reason: &str) {
        let mut inner = self.inner.write().await;
        let Some(key) = inner.reverse.get(&socket_id).cloned() else {
            debug!(socket_id, reason, "disconnect for unknown socket, already processed");
            return;
        };

        if let Some(timer) = inner.grace.get(&key)
            && !timer.handle.is_finished()
        {
            debug!(
                user_id = %key.0,
                device_hash = %key.1,
                reason,
                grace_socket = timer.socket_id,
                "disconnect while already in grace, timer continues"
            );
            return;
        }

        info!(
            user_id = %key.0,
            device_hash = %key.1,
            socket_id,
            reason,
            grace_secs = self.grace_period.as_secs(),
            "disconnect, starting grace period"
        );

        let manager = self.clone();
        let timer_key = key.clone();
        let grace_period = self.grace_period;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(grace_period).await;
            manager.finalize_disconnect(&timer_key, socket_id).await;
        });
        inner.grace.insert(key, GraceTimer { socket_id, handle });
    }

    /// Remove state for a key — but only when the socket that started
    /// the timer is still the one registered there. A newer socket means
    /// the session survived; only the stale reverse entry is cleared.
    async fn finalize_disconnect(&self, key: &ConnKey, socket_id: u64) {
        let mut inner = self.inner.write().await;
        inner.grace.remove(key);

        let current = inner
            .active
            .get(&key.0)
            .and_then(|devices| devices.get(&key.1))
            .map(|s| s.socket_id);

        match current {
            Some(current_id) if current_id != socket_id => {
                inner.reverse.remove(&socket_id);
                info!(
                    user_id = %key.0,
                    device_hash = %key.1,
                    stale_socket = socket_id,
                    current_socket = current_id,
                    "session taken over by newer socket, preserved"
                );
            },
            _ => {
                inner.reverse.remove(&socket_id);
                if let Some(devices) = inner.active.get_mut(&key.0) {
                    devices.remove(&key.1);
                    if devices.is_empty() {
                        inner.active.remove(&key.0);
                    }
                }
                inner.active_chat.remove(key);
                info!(
                    user_id = %key.0,
                    device_hash = %key.1,
                    socket_id,
                    "session removed after grace period"
                );
            },
        }
    }

    // ── Sending ──────────────────────────────────────────────────────────

    /// Send one event to one device. Send failures schedule that device's
    /// disconnect; they never propagate to the caller.
    pub async fn send_personal_message(
        &self,
        user_id: &str,
        device_hash: &str,
        event: &ServerEvent,
    ) {
        let Ok(frame) = serde_json::to_string(event) else {
            warn!(event = event.kind(), "failed to serialize outbound event");
            return;
        };

        let socket = {
            let inner = self.inner.read().await;
            inner
                .active
                .get(user_id)
                .and_then(|devices| devices.get(device_hash))
                .cloned()
        };

        match socket {
            Some(socket) => {
                if socket.sender.send(frame).is_err() {
                    warn!(user_id, device_hash, "send failed, scheduling disconnect");
                    self.disconnect(socket.socket_id, "send error").await;
                }
            },
            None => debug!(
                user_id,
                device_hash, "no live socket for personal message (grace or gone)"
            ),
        }
    }

    /// Broadcast to all of a user's devices, optionally excluding one.
    /// Per-device failures disconnect that device; siblings proceed.
    pub async fn broadcast_to_user(
        &self,
        user_id: &str,
        event: &ServerEvent,
        exclude_device_hash: Option<&str>,
    ) {
        let Ok(frame) = serde_json::to_string(event) else {
            warn!(event = event.kind(), "failed to serialize outbound event");
            return;
        };

        let targets: Vec<(String, DeviceSocket)> = {
            let inner = self.inner.read().await;
            inner
                .active
                .get(user_id)
                .map(|devices| {
                    devices
                        .iter()
                        .filter(|(hash, _)| Some(hash.as_str()) != exclude_device_hash)
                        .map(|(hash, socket)| (hash.clone(), socket.clone()))
                        .collect()
                })
                .unwrap_or_default()
        };

        for (device_hash, socket) in targets {
            if socket.sender.send(frame.clone()).is_err() {
                warn!(user_id, device_hash = %device_hash, "broadcast send failed, scheduling disconnect");
                self.disconnect(socket.socket_id, "broadcast error").await;
            }
        }
    }

    // ── Queries ──────────────────────────────────────────────────────────

    /// True iff the user has at least one live socket or one pending
    /// grace timer. Gates optional work like email notifications.
    pub async fn is_user_active(&self, user_id: &str) -> bool {
        let inner = self.inner.read().await;
        if inner
            .active
            .get(user_id)
            .is_some_and(|devices| !devices.is_empty())
        {
            return true;
        }
        inner
            .grace
            .iter()
            .any(|((uid, _), timer)| uid == user_id && !timer.handle.is_finished())
    }

    /// Set the active chat for a device. Rejected silently unless the key
    /// has a live socket or is in grace.
    pub async fn set_active_chat(&self, user_id: &str, device_hash: &str, chat_id: Option<String>) {
        let key: ConnKey = (user_id.to_string(), device_hash.to_string());
        let mut inner = self.inner.write().await;

        let live = inner
            .active
            .get(user_id)
            .is_some_and(|devices| devices.contains_key(device_hash));
        let in_grace = inner
            .grace
            .get(&key)
            .is_some_and(|timer| !timer.handle.is_finished());

        if live || in_grace {
            inner.active_chat.insert(key, chat_id);
        } else {
            warn!(user_id, device_hash, "set_active_chat for absent connection, ignored");
        }
    }

    /// Active chat for a device, `None` once the key is fully finalized.
    pub async fn get_active_chat(&self, user_id: &str, device_hash: &str) -> Option<String> {
        let key: ConnKey = (user_id.to_string(), device_hash.to_string());
        let inner = self.inner.read().await;

        let live = inner
            .active
            .get(user_id)
            .is_some_and(|devices| devices.contains_key(device_hash));
        let in_grace = inner
            .grace
            .get(&key)
            .is_some_and(|timer| !timer.handle.is_finished());

        if live || in_grace {
            inner.active_chat.get(&key).cloned().flatten()
        } else {
            None
        }
    }

    /// Device hashes with live sockets for a user.
    pub async fn live_devices(&self, user_id: &str) -> Vec<String> {
        self.inner
            .read()
            .await
            .active
            .get(user_id)
            .map(|devices| devices.keys().cloned().collect())
            .unwrap_or_default()
    }
}

impl Default for ConnectionManager {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use veil_protocol::ErrorShape;

    fn event() -> ServerEvent {
        ServerEvent::Error(ErrorShape::new("test"))
    }

    #[tokio::test]
    async fn reconnect_within_grace_preserves_active_chat() {
        tokio::time::pause();
        let manager = ConnectionManager::new();

        let (socket, _rx) = manager.connect("u1", "d1").await;
        manager
            .set_active_chat("u1", "d1", Some("chat-1".into()))
            .await;

        manager.disconnect(socket, "network drop").await;
        tokio::time::advance(Duration::from_secs(10)).await;

        // Reconnect before the 30s grace elapses.
        let (_socket2, _rx2) = manager.connect("u1", "d1").await;
        assert_eq!(
            manager.get_active_chat("u1", "d1").await.as_deref(),
            Some("chat-1")
        );
    }

    #[tokio::test]
    async fn grace_expiry_removes_state() {
        tokio::time::pause();
        let manager = ConnectionManager::new();

        let (socket, _rx) = manager.connect("u1", "d1").await;
        manager
            .set_active_chat("u1", "d1", Some("chat-1".into()))
            .await;
        manager.disconnect(socket, "closed").await;

        tokio::time::sleep(Duration::from_secs(31)).await;
        tokio::time::sleep(Duration::from_millis(1)).await;

        assert!(!manager.is_user_active("u1").await);
        assert!(manager.get_active_chat("u1", "d1").await.is_none());
    }

    #[tokio::test]
    async fn late_disconnect_of_replaced_socket_is_noop() {
        tokio::time::pause();
        let manager = ConnectionManager::new();

        let (old_socket, _rx) = manager.connect("u1", "d1").await;
        manager
            .set_active_chat("u1", "d1", Some("chat-1".into()))
            .await;
        manager.disconnect(old_socket, "drop").await;

        // New socket takes over the key mid-grace; the old socket's
        // reverse entry is gone, so its late disconnect event must not
        // touch the session.
        let (_new_socket, _rx2) = manager.connect("u1", "d1").await;
        manager.disconnect(old_socket, "late event").await;
        tokio::time::advance(Duration::from_secs(31)).await;
        tokio::task::yield_now().await;

        assert!(manager.is_user_active("u1").await);
        assert_eq!(
            manager.get_active_chat("u1", "d1").await.as_deref(),
            Some("chat-1")
        );
    }

    #[tokio::test]
    async fn user_in_grace_counts_as_active() {
        tokio::time::pause();
        let manager = ConnectionManager::new();

        let (socket, _rx) = manager.connect("u1", "d1").await;
        manager.disconnect(socket, "drop").await;

        assert!(manager.is_user_active("u1").await);
        tokio::time::sleep(Duration::from_secs(31)).await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(!manager.is_user_active("u1").await);
    }

    #[tokio::test]
    async fn broadcast_excludes_named_device() {
        let manager = ConnectionManager::new();
        let (_s1, mut rx1) = manager.connect("u1", "d1").await;
        let (_s2, mut rx2) = manager.connect("u1", "d2").await;

        manager.broadcast_to_user("u1", &event(), Some("d1")).await;

        assert!(rx1.try_recv().is_err());
        assert!(rx2.try_recv().is_ok());
    }

    #[tokio::test]
    async fn set_active_chat_on_absent_connection_is_ignored() {
        let manager = ConnectionManager::new();
        manager
            .set_active_chat("ghost", "d1", Some("chat-1".into()))
            .await;
        assert!(manager.get_active_chat("ghost", "d1").await.is_none());
    }

    #[tokio::test]
    async fn send_failure_schedules_disconnect_not_error() {
        tokio::time::pause();
        let manager = ConnectionManager::new();
        let (_socket, rx) = manager.connect("u1", "d1").await;
        drop(rx); // Write loop gone; sends now fail.

        manager.send_personal_message("u1", "d1", &event()).await;
        // Still active: the failure only started the grace period.
        assert!(manager.is_user_active("u1").await);

        tokio::time::sleep(Duration::from_secs(31)).await;
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(!manager.is_user_active("u1").await);
    }
}

//! Named task queues.
//!
//! Tasks land on a queue tagged with their app (`app_ai`, `app_web`, …).
//! Priority is implicit in queue choice; within a queue there is no
//! reordering. Rate-limited tasks re-enqueue themselves after the
//! provider's wait time.

use std::{collections::HashMap, sync::Arc, time::Duration};

use tokio::sync::{Mutex, mpsc};
use tracing::{debug, warn};

use crate::types::AskTaskRequest;

/// Queue the core AI app enqueues ask tasks on.
pub const QUEUE_APP_AI: &str = "app_ai";

struct QueueInner {
    senders: HashMap<String, mpsc::UnboundedSender<AskTaskRequest>>,
}

/// Registry of named queues. Workers take the receiver once at startup;
/// everything else holds the cheap handle.
#[derive(Clone)]
pub struct TaskQueue {
    inner: Arc<Mutex<QueueInner>>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueInner {
                senders: HashMap::new(),
            })),
        }
    }

    /// Create (or replace) a named queue, returning its receiver for the
    /// worker loop.
    pub async fn create(&self, queue: &str) -> mpsc::UnboundedReceiver<AskTaskRequest> {
        let (sender, receiver) = mpsc::unbounded_channel();
        self.inner
            .lock()
            .await
            .senders
            .insert(queue.to_string(), sender);
        receiver
    }

    /// Enqueue a task. Unknown queues drop the task with a warning — the
    /// caller picked a queue no worker is draining.
    pub async fn enqueue(&self, queue: &str, request: AskTaskRequest) {
        let inner = self.inner.lock().await;
        match inner.senders.get(queue) {
            Some(sender) => {
                if sender.send(request).is_err() {
                    warn!(queue, "queue worker gone, task dropped");
                }
            },
            None => warn!(queue, "enqueue to unknown queue"),
        }
    }

    /// Re-enqueue after a delay (rate-limit scheduled retry).
    pub fn enqueue_after(&self, queue: &str, request: AskTaskRequest, wait: Duration) {
        let this = self.clone();
        let queue = queue.to_string();
        tokio::spawn(async move {
            debug!(queue = %queue, task_id = %request.task_id, wait_secs = wait.as_secs(), "delayed re-enqueue");
            tokio::time::sleep(wait).await;
            this.enqueue(&queue, request).await;
        });
    }
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    fn request(task_id: &str) -> AskTaskRequest {
        AskTaskRequest {
            task_id: task_id.into(),
            chat_id: "c".into(),
            user_id: "u".into(),
            user_id_hash: "uh".into(),
            message_id: "m".into(),
            mate_id: None,
            active_focus_id: None,
            chat_has_title: false,
            is_incognito: false,
            preselected_skills: None,
            is_focus_continuation: false,
            continuation_message_id: None,
            origin_device_hash: None,
        }
    }

    #[tokio::test]
    async fn enqueue_preserves_order() {
        let queue = TaskQueue::new();
        let mut receiver = queue.create(QUEUE_APP_AI).await;

        queue.enqueue(QUEUE_APP_AI, request("t1")).await;
        queue.enqueue(QUEUE_APP_AI, request("t2")).await;

        assert_eq!(receiver.recv().await.unwrap().task_id, "t1");
        assert_eq!(receiver.recv().await.unwrap().task_id, "t2");
    }

    #[tokio::test]
    async fn delayed_enqueue_arrives_after_wait() {
        tokio::time::pause();
        let queue = TaskQueue::new();
        let mut receiver = queue.create(QUEUE_APP_AI).await;

        queue.enqueue_after(QUEUE_APP_AI, request("t1"), Duration::from_secs(30));
        tokio::task::yield_now().await;
        assert!(receiver.try_recv().is_err());

        tokio::time::advance(Duration::from_secs(31)).await;
        assert_eq!(receiver.recv().await.unwrap().task_id, "t1");
    }

    #[tokio::test]
    async fn unknown_queue_drops_silently() {
        let queue = TaskQueue::new();
        queue.enqueue("nope", request("t1")).await;
    }
}

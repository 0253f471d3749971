//! Task types and lifecycle.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

pub use veil_store::types::TaskState;

/// Everything the runner needs to produce one assistant message. The
/// task id doubles as the assistant message id for the reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AskTaskRequest {
    pub task_id: String,
    pub chat_id: String,
    pub user_id: String,
    pub user_id_hash: String,
    /// The triggering user message.
    pub message_id: String,
    #[serde(default)]
    pub mate_id: Option<String>,
    #[serde(default)]
    pub active_focus_id: Option<String>,
    #[serde(default)]
    pub chat_has_title: bool,
    #[serde(default)]
    pub is_incognito: bool,
    /// Skill keys the preprocessor allowed this turn. `None` is an
    /// upstream violation and exposes no tools.
    #[serde(default)]
    pub preselected_skills: Option<HashSet<String>>,
    /// Set on the focus-rejection continuation path.
    #[serde(default)]
    pub is_focus_continuation: bool,
    /// Reuse this id as the assistant message id so the continuation
    /// replaces the same bubble instead of opening a new one.
    #[serde(default)]
    pub continuation_message_id: Option<String>,
    /// The device that sent the message, excluded from chunk echo.
    #[serde(default)]
    pub origin_device_hash: Option<String>,
}

impl AskTaskRequest {
    /// The id under which the assistant reply is stored and streamed.
    pub fn reply_message_id(&self) -> &str {
        self.continuation_message_id.as_deref().unwrap_or(&self.task_id)
    }
}

/// Terminal result of one runner invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RunOutcome {
    Completed {
        text: String,
        prompt_tokens: u64,
        completion_tokens: u64,
    },
    Cancelled,
    Failed {
        message: String,
    },
    /// Provider scheduled a retry; the worker re-enqueues after the wait.
    ScheduledForRetry {
        wait_time_seconds: u64,
    },
}

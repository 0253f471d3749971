//! Task dispatcher and ask runner.
//!
//! One user message becomes one task; the runner turns it into a tree of
//! provider calls and skill invocations, streaming unified chunks back to
//! the user's devices through the event bus. Cancellation is observed at
//! every suspension point; rate-limited provider calls re-enqueue the
//! task instead of failing it.

pub mod error;
pub mod events;
pub mod queue;
pub mod runner;
pub mod types;

pub use {
    error::{Result, TaskError},
    events::{OutboundEvent, UserEventBus},
    queue::TaskQueue,
    runner::{AskRunner, RunnerDeps},
    types::{AskTaskRequest, RunOutcome, TaskState},
};

//! Model routing: user override parsing and leaderboard-driven selection.

pub mod overrides;
pub mod selector;

pub use {
    overrides::{UserOverrides, compose_message_with_directives, parse_overrides, validate_model_override},
    selector::{
        Complexity, LeaderboardEntry, LeaderboardSnapshot, ModelSelection, ModelSelector,
        SelectionInput,
    },
};

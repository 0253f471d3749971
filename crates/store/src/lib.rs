//! Zero-knowledge content store.
//!
//! Two tiers: the cache tier is the authoritative source of truth for
//! in-flight conversation state (single writer per chat); the durable tier
//! is eventually consistent behind it. Every payload field this crate
//! persists is client-supplied ciphertext or a hashed identifier — there is
//! no code path here that produces plaintext chat content.

pub mod cache;
pub mod durable;
pub mod durable_memory;
pub mod durable_sqlite;
pub mod embed_keys;
pub mod error;
pub mod ownership;
pub mod pager;
pub mod types;

pub use {
    cache::CacheTier,
    durable::DurableStore,
    durable_memory::MemoryStore,
    durable_sqlite::SqliteStore,
    embed_keys::store_embed_keys,
    error::{Result, StoreError},
    ownership::{OwnershipStatus, check_chat_ownership},
    pager::load_more_chats,
};

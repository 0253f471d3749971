//! Object storage contract.
//!
//! The S3 capability is external; this crate owns only its contract plus
//! two implementations: an in-memory store for tests and single-process
//! runs, and a filesystem store for development deployments.

pub mod error;
pub mod store;
pub mod store_fs;
pub mod store_memory;

pub use {
    error::BlobError,
    store::ObjectStore,
    store_fs::FsObjectStore,
    store_memory::MemoryObjectStore,
};

pub type Result<T> = std::result::Result<T, BlobError>;

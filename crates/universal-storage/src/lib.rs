//! Universal key/value storage for the mikasa session engine.
//!
//! This crate provides:
//! - [`UniversalStore`]: reactive in-memory state, a cookie tier and a local
//!   tier, read and written with one deterministic resolution order
//! - [`StorageBackend`]: the trait persisted tiers implement
//! - [`MemoryStorage`] and [`JsonFileStorage`] backends

mod file;
mod keys;
mod memory;
mod store;
mod traits;

pub use file::JsonFileStorage;
pub use keys::StorageKeys;
pub use memory::MemoryStorage;
pub use store::{RenderContext, StoreOptions, UniversalStore, WatchCallback, WatchId};
pub use traits::StorageBackend;

use thiserror::Error;

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Backend-specific storage error
    #[error("Storage backend error: {0}")]
    Backend(String),

    /// Encoding/decoding error
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

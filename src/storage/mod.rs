//! Key-value storage backends for tokens and session flags
//!
//! A session is replicated across three backends: a durable store that
//! survives restarts, a session-scoped store private to one context, and a
//! cookie jar. [`TokenStore`] fans writes out across them and defines the
//! read priority.

mod cookie;
mod file;
mod flags;
mod memory;
mod redundant;
mod shared;
mod types;

use thiserror::Error;

pub use cookie::CookieStore;
pub use file::FileStore;
pub use flags::SessionFlags;
pub use memory::MemoryStore;
pub use redundant::TokenStore;
pub use shared::{ContextId, SharedStore};
pub use types::*;

/// Errors raised by a storage backend
#[derive(Error, Debug)]
pub enum StorageError {
    /// The backend refused access (disabled, blocked by a privacy setting, full)
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// A string key-value backend
pub trait KeyValueStore: Send + Sync {
    /// Backend name used in logs
    fn name(&self) -> &str;

    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Removing a missing key is not an error
    fn remove(&self, key: &str) -> Result<(), StorageError>;
}

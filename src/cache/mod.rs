// src/cache/mod.rs

//! Pluggable persistence for a realm's JSON Web Key Set.
//!
//! A cache instance is bound to exactly one realm identity. None of the
//! backends expire entries on their own: freshness is the caller's concern,
//! normally handled by clearing the entry and fetching the keys again.

mod file;
mod memory;
#[cfg(feature = "redis-cache")]
mod redis_store;

pub use file::FileKeyCache;
pub use memory::MemoryKeyCache;
#[cfg(feature = "redis-cache")]
pub use redis_store::RedisKeyCache;

use crate::error::Result;
use crate::model::JsonWebKeySet;
use async_trait::async_trait;

/// Storage capability for the realm's signing keys.
#[async_trait]
pub trait PublicKeyCache: Send + Sync {
    /// Persists the key set, replacing any previous entry.
    async fn save(&self, keys: &JsonWebKeySet) -> Result<()>;

    /// Returns the cached key set, or `None` when no entry exists.
    async fn load(&self) -> Result<Option<JsonWebKeySet>>;

    /// Removes the entry. Returns `true` when an entry was present.
    async fn clear(&self) -> Result<bool>;
}

//! Cached query results and their invalidation.
//!
//! Readers populate the cache under a [`CacheKey`]; the workers in
//! [`workers`] react to domain events by deleting whole [`CacheScope`]s.
//!
//! Every write must go through [`CacheStore::put`] with a key built by one
//! of the [`CacheKey`] constructors. Both backends find a scope's members
//! through an index that `put` maintains, so a value written any other way
//! is never invalidated. [`crate::services::OrderHistoryService`] is the
//! reference reader.
//!
//! # Backends
//!
//! - [`RedisCacheStore`] - shared by every instance. Keeps a set of member
//!   keys per scope so invalidation never scans the keyspace.
//! - [`MokaCacheStore`] - process-local, for single-instance mode and tests.
//!   Keeps the same per-scope index in memory.

mod memory;
mod redis;
pub mod workers;

pub use memory::MokaCacheStore;
pub use redis::RedisCacheStore;
pub use workers::register_invalidation_workers;

use async_trait::async_trait;
use thiserror::Error;

use apple_store_core::{CacheKey, CacheScope};

/// Errors that can occur when talking to a cache backend.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Redis command or connection failed.
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),
}

#[cfg(test)]
pub(crate) fn unreachable_backend() -> CacheError {
    CacheError::from(::redis::RedisError::from((
        ::redis::ErrorKind::IoError,
        "connection refused",
    )))
}

/// Key/value store for cached query results.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// The cached value at `key`, if present and not expired.
    async fn get(&self, key: &CacheKey) -> Result<Option<String>, CacheError>;

    /// Store `value` at `key` with the store's TTL.
    async fn put(&self, key: &CacheKey, value: String) -> Result<(), CacheError>;

    /// Delete the given keys. Returns how many existed.
    async fn delete(&self, keys: &[CacheKey]) -> Result<u64, CacheError>;

    /// Delete every key in `scope`. Returns how many existed.
    async fn delete_scope(&self, scope: &CacheScope) -> Result<u64, CacheError>;
}

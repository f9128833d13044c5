//! Shared cache backed by Redis.
//!
//! Scoped keys are registered in an index set named `cache-index:<scope>` when
//! they are written. The index expires with the newest member, so it never
//! outlives what it points to by more than one TTL.
//!
//! Invalidation reads the index, so scoped keys are only ever invalidated if
//! they were written through [`CacheStore::put`].

use std::time::Duration;

use ::redis::AsyncCommands;
use ::redis::aio::ConnectionManager;
use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, info, instrument};

use apple_store_core::{CacheKey, CacheScope};

use super::{CacheError, CacheStore};

const INDEX_PREFIX: &str = "cache-index:";

/// Cache shared across instances through Redis.
#[derive(Clone)]
pub struct RedisCacheStore {
    conn: ConnectionManager,
    ttl_secs: u64,
}

impl RedisCacheStore {
    /// Connect to Redis.
    ///
    /// # Errors
    ///
    /// Returns error if the URL is invalid or Redis cannot be reached.
    pub async fn connect(url: &SecretString, ttl: Duration) -> Result<Self, CacheError> {
        let client = ::redis::Client::open(url.expose_secret())?;
        let conn = ConnectionManager::new(client).await?;
        info!("Connected to Redis cache");
        Ok(Self {
            conn,
            ttl_secs: ttl.as_secs().max(1),
        })
    }
}

fn index_key(scope: &CacheScope) -> String {
    format!("{INDEX_PREFIX}{scope}")
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<String>, CacheError> {
        let mut conn = self.conn.clone();
        Ok(conn.get(key.as_str()).await?)
    }

    #[instrument(skip(self, value), fields(key = key.as_str()))]
    async fn put(&self, key: &CacheKey, value: String) -> Result<(), CacheError> {
        let mut conn = self.conn.clone();
        let mut pipe = ::redis::pipe();
        pipe.atomic()
            .set_ex(key.as_str(), value, self.ttl_secs)
            .ignore();

        if let Some(scope) = key.scope() {
            let index = index_key(scope);
            let ttl = i64::try_from(self.ttl_secs).unwrap_or(i64::MAX);
            pipe.sadd(&index, key.as_str())
                .ignore()
                .expire(&index, ttl)
                .ignore();
        }

        let () = pipe.query_async(&mut conn).await?;
        Ok(())
    }

    async fn delete(&self, keys: &[CacheKey]) -> Result<u64, CacheError> {
        if keys.is_empty() {
            return Ok(0);
        }
        let mut conn = self.conn.clone();
        let names: Vec<&str> = keys.iter().map(CacheKey::as_str).collect();
        let deleted: u64 = conn.del(names).await?;
        Ok(deleted)
    }

    #[instrument(skip(self), fields(scope = scope.as_str()))]
    async fn delete_scope(&self, scope: &CacheScope) -> Result<u64, CacheError> {
        let mut conn = self.conn.clone();
        let index = index_key(scope);

        // Read and drop the index in one transaction; a put that lands after
        // this starts a fresh index
        let (members, _): (Vec<String>, u64) = ::redis::pipe()
            .atomic()
            .smembers(&index)
            .del(&index)
            .query_async(&mut conn)
            .await?;
        if members.is_empty() {
            return Ok(0);
        }

        let deleted: u64 = conn.del(&members).await?;
        debug!(deleted, indexed = members.len(), "Deleted cache scope");
        Ok(deleted)
    }
}

impl std::fmt::Debug for RedisCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCacheStore")
            .field("ttl_secs", &self.ttl_secs)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use apple_store_core::UserId;

    use super::*;

    #[test]
    fn test_index_key() {
        let scope = CacheScope::user_orders(&UserId::new("u1"));
        assert_eq!(index_key(&scope), "cache-index:orders:user:u1:");
    }
}

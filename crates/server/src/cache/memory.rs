//! Process-local cache backed by `moka`.
//!
//! Like the Redis backend, scoped keys are tracked in a per-scope index so
//! that [`CacheStore::delete_scope`] only touches that scope's members.
//! Each write is stamped with a generation; the eviction listener prunes an
//! index entry only if it still points at the evicted write.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;

use apple_store_core::{CacheKey, CacheScope};

use super::{CacheError, CacheStore};

const MAX_CAPACITY: u64 = 10_000;

type ScopeIndex = Arc<Mutex<HashMap<CacheScope, HashMap<String, u64>>>>;

#[derive(Clone)]
struct Entry {
    value: String,
    scope: Option<CacheScope>,
    generation: u64,
}

/// In-process cache with a fixed TTL.
#[derive(Clone)]
pub struct MokaCacheStore {
    cache: Cache<String, Entry>,
    index: ScopeIndex,
    generation: Arc<AtomicU64>,
}

impl MokaCacheStore {
    /// Create a cache whose entries expire after `ttl`.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        let index = ScopeIndex::default();
        let listener_index = Arc::clone(&index);
        let cache = Cache::builder()
            .max_capacity(MAX_CAPACITY)
            .time_to_live(ttl)
            .eviction_listener(move |key: Arc<String>, entry: Entry, _cause| {
                if let Some(scope) = &entry.scope {
                    forget(&listener_index, scope, &key, entry.generation);
                }
            })
            .build();
        Self {
            cache,
            index,
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Whether a value is cached at the raw key `key`.
    pub async fn contains(&self, key: &str) -> bool {
        self.cache.get(key).await.is_some()
    }
}

fn lock(index: &ScopeIndex) -> MutexGuard<'_, HashMap<CacheScope, HashMap<String, u64>>> {
    index.lock().unwrap_or_else(PoisonError::into_inner)
}

fn forget(index: &ScopeIndex, scope: &CacheScope, key: &str, generation: u64) {
    let mut index = lock(index);
    let emptied = match index.get_mut(scope) {
        Some(members) => {
            if members.get(key) == Some(&generation) {
                members.remove(key);
            }
            members.is_empty()
        }
        None => false,
    };
    if emptied {
        index.remove(scope);
    }
}

#[async_trait]
impl CacheStore for MokaCacheStore {
    async fn get(&self, key: &CacheKey) -> Result<Option<String>, CacheError> {
        Ok(self.cache.get(key.as_str()).await.map(|entry| entry.value))
    }

    async fn put(&self, key: &CacheKey, value: String) -> Result<(), CacheError> {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let scope = key.scope().cloned();
        let entry = Entry {
            value,
            scope: scope.clone(),
            generation,
        };
        self.cache.insert(key.as_str().to_owned(), entry).await;

        if let Some(scope) = scope {
            lock(&self.index)
                .entry(scope)
                .or_default()
                .insert(key.as_str().to_owned(), generation);
        }
        Ok(())
    }

    async fn delete(&self, keys: &[CacheKey]) -> Result<u64, CacheError> {
        let mut deleted = 0;
        for key in keys {
            if self.cache.remove(key.as_str()).await.is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    async fn delete_scope(&self, scope: &CacheScope) -> Result<u64, CacheError> {
        let members = lock(&self.index).remove(scope).unwrap_or_default();

        let mut deleted = 0;
        for key in members.into_keys() {
            if self.cache.remove(&key).await.is_some() {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}

impl std::fmt::Debug for MokaCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaCacheStore")
            .field("entries", &self.cache.entry_count())
            .field("scopes", &lock(&self.index).len())
            .finish()
    }
}

//! A user's order history, read through the cache.
//!
//! Pages are cached under [`CacheKey::user_orders_page`], the same scope the
//! `user-order-modified` worker deletes when a new order commits. Cache
//! failures degrade to a store read and never fail the request.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, instrument, warn};

use apple_store_core::{CacheKey, OrderId, UserId};

use crate::cache::CacheStore;
use crate::db::{OrderStore, RepositoryError};
use crate::models::{Order, OrderWithItems};

/// Page used when the client does not ask for one.
pub const DEFAULT_PAGE: u32 = 1;
/// Page size used when the client does not ask for one.
pub const DEFAULT_LIMIT: u32 = 10;
/// Largest page size a client may request.
pub const MAX_LIMIT: u32 = 100;

/// Errors that can occur while reading order history.
#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("page must be at least 1")]
    InvalidPage,

    #[error("limit must be between 1 and {MAX_LIMIT}, got {0}")]
    InvalidLimit(u32),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("failed to encode order page: {0}")]
    Encode(#[from] serde_json::Error),
}

impl HistoryError {
    /// Whether the caller asked for something invalid.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::InvalidPage | Self::InvalidLimit(_))
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Pagination {
    page: u32,
    limit: u32,
    total_pages: u64,
    total_orders: u64,
}

#[derive(Debug, Serialize)]
struct OrderPage {
    data: Vec<Order>,
    pagination: Pagination,
}

/// Reads orders on behalf of the user who placed them.
#[derive(Clone)]
pub struct OrderHistoryService {
    store: Arc<dyn OrderStore>,
    cache: Arc<dyn CacheStore>,
}

impl OrderHistoryService {
    /// Create a new history service.
    #[must_use]
    pub fn new(store: Arc<dyn OrderStore>, cache: Arc<dyn CacheStore>) -> Self {
        Self { store, cache }
    }

    /// One page of `user_id`'s orders as a JSON document, newest first.
    ///
    /// The document is `{"data": [..], "pagination": {..}}` and is served
    /// from the cache when present.
    ///
    /// # Errors
    ///
    /// Returns `InvalidPage`/`InvalidLimit` for out-of-range paging, or the
    /// store error on a cache miss.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn page(
        &self,
        user_id: &UserId,
        page: u32,
        limit: u32,
    ) -> Result<String, HistoryError> {
        if page == 0 {
            return Err(HistoryError::InvalidPage);
        }
        if limit == 0 || limit > MAX_LIMIT {
            return Err(HistoryError::InvalidLimit(limit));
        }

        let key = CacheKey::user_orders_page(user_id, page, limit);
        match self.cache.get(&key).await {
            Ok(Some(body)) => {
                debug!("Cache hit for order page");
                return Ok(body);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Order page cache read failed"),
        }

        let data = self.store.list_for_user(user_id, page, limit).await?;
        let total_orders = self.store.count_for_user(user_id).await?;
        let body = serde_json::to_string(&OrderPage {
            data,
            pagination: Pagination {
                page,
                limit,
                total_pages: total_orders.div_ceil(u64::from(limit)),
                total_orders,
            },
        })?;

        if let Err(e) = self.cache.put(&key, body.clone()).await {
            warn!(error = %e, "Order page cache write failed");
        }
        Ok(body)
    }

    /// One of `user_id`'s orders with its items.
    ///
    /// Orders placed by someone else are reported as absent.
    ///
    /// # Errors
    ///
    /// Returns the store error if the lookup fails.
    #[instrument(skip(self), fields(user_id = %user_id, order_id = %order_id))]
    pub async fn order(
        &self,
        user_id: &UserId,
        order_id: OrderId,
    ) -> Result<Option<OrderWithItems>, HistoryError> {
        let found = self.store.get(order_id).await?;
        Ok(found.filter(|o| &o.order.user_id == user_id))
    }
}

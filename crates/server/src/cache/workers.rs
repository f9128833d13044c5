//! Cache invalidation workers.
//!
//! Each worker deletes the cached query results a domain event made stale.
//! Workers are best-effort: failures are logged and swallowed, and a missed
//! invalidation heals when the entry's TTL runs out.
//!
//! | Channel                     | Worker                                  |
//! |-----------------------------|-----------------------------------------|
//! | `user-order-modified`       | [`invalidate_user_order_caches`]        |
//! | `user-order-modified`       | [`invalidate_customer_analytics_cache`] |
//! | `product-modified`          | [`invalidate_product_caches`]           |
//! | `product-created`/`-deleted`| [`invalidate_product_listings`]         |
//! | `featured-product-modified` | [`invalidate_featured_products`]        |
//! | `user-modified`             | [`invalidate_user_cache`]               |
//! | `user-deleted`              | [`invalidate_user_listings`]            |

use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use apple_store_core::events::{CustomerEmail, ProductModified, UserModified, UserOrderModified};
use apple_store_core::{CacheKey, CacheScope, Channel, ProductId, UserId};

use super::CacheStore;
use crate::events::EventRegistry;

/// Delete every cached order page of `user_id`.
pub async fn invalidate_user_order_caches(cache: &dyn CacheStore, user_id: &UserId) {
    let deleted = delete_scope(cache, &CacheScope::user_orders(user_id)).await;
    if deleted > 0 {
        info!(%user_id, deleted, "Invalidated user order caches");
    }
}

/// Delete cached analytics of the customer with `email`.
pub async fn invalidate_customer_analytics_cache(cache: &dyn CacheStore, email: &str) {
    if email.trim().is_empty() {
        debug!("No customer email, skipping analytics invalidation");
        return;
    }
    let deleted = delete_scope(cache, &CacheScope::customer_analytics(email)).await;
    if deleted > 0 {
        info!(deleted, "Invalidated customer analytics cache");
    }
}

/// Delete everything that may show a modified product.
pub async fn invalidate_product_caches(cache: &dyn CacheStore, product_id: &ProductId, slug: &str) {
    let mut keys = vec![CacheKey::product_by_id(product_id)];
    if !slug.is_empty() {
        keys.push(CacheKey::product_by_slug(slug));
    }

    let mut deleted = match cache.delete(&keys).await {
        Ok(count) => count,
        Err(e) => {
            warn!(%product_id, error = %e, "Failed to delete product cache keys");
            0
        }
    };
    for scope in [
        CacheScope::product_listings(),
        CacheScope::product_recommendations(),
        CacheScope::featured_products(),
    ] {
        deleted += delete_scope(cache, &scope).await;
    }

    info!(%product_id, slug, deleted, "Invalidated product caches");
}

/// Delete product listings after a product was created or deleted.
///
/// Recommendations go too since they may point at a deleted product.
pub async fn invalidate_product_listings(cache: &dyn CacheStore) {
    let deleted = delete_scope(cache, &CacheScope::product_listings()).await
        + delete_scope(cache, &CacheScope::product_recommendations()).await;
    info!(deleted, "Invalidated product listings");
}

/// Delete cached featured product selections.
pub async fn invalidate_featured_products(cache: &dyn CacheStore) {
    let deleted = delete_scope(cache, &CacheScope::featured_products()).await;
    info!(deleted, "Invalidated featured products");
}

/// Delete everything cached about `user_id`.
///
/// Admin edits also change what the admin user listings show.
pub async fn invalidate_user_cache(
    cache: &dyn CacheStore,
    user_id: &UserId,
    is_from_admin_edit: bool,
) {
    let mut deleted = delete_scope(cache, &CacheScope::user(user_id)).await;
    if is_from_admin_edit {
        deleted += delete_scope(cache, &CacheScope::user_listings()).await;
    }
    info!(%user_id, is_from_admin_edit, deleted, "Invalidated user cache");
}

/// Delete cached admin user listings.
pub async fn invalidate_user_listings(cache: &dyn CacheStore) {
    let deleted = delete_scope(cache, &CacheScope::user_listings()).await;
    info!(deleted, "Invalidated user listings");
}

async fn delete_scope(cache: &dyn CacheStore, scope: &CacheScope) -> u64 {
    match cache.delete_scope(scope).await {
        Ok(deleted) => deleted,
        Err(e) => {
            warn!(scope = scope.as_str(), error = %e, "Failed to invalidate cache scope");
            0
        }
    }
}

fn parse<T: DeserializeOwned>(channel: Channel, payload: &str) -> Option<T> {
    match serde_json::from_str(payload) {
        Ok(value) => Some(value),
        Err(e) => {
            debug!(%channel, error = %e, "Dropping malformed event payload");
            None
        }
    }
}

/// Install every invalidation worker in `registry`.
pub fn register_invalidation_workers(registry: &mut EventRegistry, cache: Arc<dyn CacheStore>) {
    let c = Arc::clone(&cache);
    registry.on(Channel::ProductModified, move |payload| {
        let cache = Arc::clone(&c);
        async move {
            if let Some(data) = parse::<ProductModified>(Channel::ProductModified, &payload) {
                invalidate_product_caches(cache.as_ref(), &data.product_id, &data.slug).await;
            }
        }
    });

    for channel in [Channel::ProductCreated, Channel::ProductDeleted] {
        let c = Arc::clone(&cache);
        registry.on(channel, move |_| {
            let cache = Arc::clone(&c);
            async move { invalidate_product_listings(cache.as_ref()).await }
        });
    }

    let c = Arc::clone(&cache);
    registry.on(Channel::FeaturedProductModified, move |_| {
        let cache = Arc::clone(&c);
        async move { invalidate_featured_products(cache.as_ref()).await }
    });

    let c = Arc::clone(&cache);
    registry.on(Channel::UserModified, move |payload| {
        let cache = Arc::clone(&c);
        async move {
            if let Some(data) = parse::<UserModified>(Channel::UserModified, &payload) {
                invalidate_user_cache(cache.as_ref(), &data.user_id, data.is_from_admin_edit)
                    .await;
            }
        }
    });

    let c = Arc::clone(&cache);
    registry.on(Channel::UserDeleted, move |_| {
        let cache = Arc::clone(&c);
        async move { invalidate_user_listings(cache.as_ref()).await }
    });

    let c = Arc::clone(&cache);
    registry.on(Channel::UserOrderModified, move |payload| {
        let cache = Arc::clone(&c);
        async move {
            if let Some(data) = parse::<UserOrderModified>(Channel::UserOrderModified, &payload) {
                invalidate_user_order_caches(cache.as_ref(), &data.user_id).await;
            }
        }
    });

    registry.on(Channel::UserOrderModified, move |payload| {
        let cache = Arc::clone(&cache);
        async move {
            if let Some(data) = parse::<CustomerEmail>(Channel::UserOrderModified, &payload) {
                invalidate_customer_analytics_cache(cache.as_ref(), &data.email).await;
            }
        }
    });
}

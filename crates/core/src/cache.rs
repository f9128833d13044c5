//! Cache key namespace.
//!
//! Every cached query result lives at a [`CacheKey`]. Keys that have unbounded
//! variants (pagination, filters) belong to a [`CacheScope`], and invalidation
//! removes the whole scope at once rather than guessing individual keys.
//!
//! ```text
//! orders:user:<userId>:<page>:<limit>        scope orders:user:<userId>:
//! analytics:customer:<email>:<variant>       scope analytics:customer:<email>:
//! product:id:<productId>                     exact
//! product:slug:<slug>                        exact
//! products:list:<query>                      scope products:list:
//! products:recommendations:<query>           scope products:recommendations:
//! products:featured:<limit>                  scope products:featured:
//! user:<userId>:<variant>                    scope user:<userId>:
//! users:list:<query>                         scope users:list:
//! ```

use serde::{Deserialize, Serialize};

use crate::types::{ProductId, UserId};

/// A key prefix that groups every variant of one cached query.
///
/// Always ends with `:` so that `orders:user:1:` never matches keys of user `10`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheScope(String);

impl CacheScope {
    fn new(prefix: String) -> Self {
        debug_assert!(prefix.ends_with(':'));
        Self(prefix)
    }

    /// Paginated order listings of one user.
    #[must_use]
    pub fn user_orders(user_id: &UserId) -> Self {
        Self::new(format!("orders:user:{user_id}:"))
    }

    /// Analytics computed for one customer.
    #[must_use]
    pub fn customer_analytics(email: &str) -> Self {
        Self::new(format!("analytics:customer:{}:", normalize_email(email)))
    }

    /// Product listing pages (all filters).
    #[must_use]
    pub fn product_listings() -> Self {
        Self::new("products:list:".to_owned())
    }

    /// Product recommendation results.
    #[must_use]
    pub fn product_recommendations() -> Self {
        Self::new("products:recommendations:".to_owned())
    }

    /// Featured product selections.
    #[must_use]
    pub fn featured_products() -> Self {
        Self::new("products:featured:".to_owned())
    }

    /// Everything cached about one user.
    #[must_use]
    pub fn user(user_id: &UserId) -> Self {
        Self::new(format!("user:{user_id}:"))
    }

    /// User listing pages (admin).
    #[must_use]
    pub fn user_listings() -> Self {
        Self::new("users:list:".to_owned())
    }

    /// The prefix string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether `key` belongs to this scope.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        key.starts_with(&self.0)
    }
}

impl std::fmt::Display for CacheScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Address of one cached value.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    key: String,
    scope: Option<CacheScope>,
}

impl CacheKey {
    fn scoped(scope: CacheScope, suffix: impl std::fmt::Display) -> Self {
        Self {
            key: format!("{scope}{suffix}"),
            scope: Some(scope),
        }
    }

    fn exact(key: String) -> Self {
        Self { key, scope: None }
    }

    /// One page of a user's order history.
    #[must_use]
    pub fn user_orders_page(user_id: &UserId, page: u32, limit: u32) -> Self {
        Self::scoped(CacheScope::user_orders(user_id), format_args!("{page}:{limit}"))
    }

    /// One analytics view for a customer.
    #[must_use]
    pub fn customer_analytics(email: &str, variant: &str) -> Self {
        Self::scoped(CacheScope::customer_analytics(email), variant)
    }

    /// Product detail looked up by id.
    #[must_use]
    pub fn product_by_id(product_id: &ProductId) -> Self {
        Self::exact(format!("product:id:{product_id}"))
    }

    /// Product detail looked up by slug.
    #[must_use]
    pub fn product_by_slug(slug: &str) -> Self {
        Self::exact(format!("product:slug:{slug}"))
    }

    /// One product listing page.
    #[must_use]
    pub fn product_listing(query: &str) -> Self {
        Self::scoped(CacheScope::product_listings(), query)
    }

    /// One recommendation result.
    #[must_use]
    pub fn product_recommendations(query: &str) -> Self {
        Self::scoped(CacheScope::product_recommendations(), query)
    }

    /// Featured products, sized by `limit`.
    #[must_use]
    pub fn featured_products(limit: u32) -> Self {
        Self::scoped(CacheScope::featured_products(), limit)
    }

    /// One view of a user record.
    #[must_use]
    pub fn user(user_id: &UserId, variant: &str) -> Self {
        Self::scoped(CacheScope::user(user_id), variant)
    }

    /// One user listing page.
    #[must_use]
    pub fn user_listing(query: &str) -> Self {
        Self::scoped(CacheScope::user_listings(), query)
    }

    /// The full key string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// The scope this key is invalidated with, if any.
    #[must_use]
    pub const fn scope(&self) -> Option<&CacheScope> {
        self.scope.as_ref()
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.key)
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_orders_key_layout() {
        let user = UserId::new("abc");
        let key = CacheKey::user_orders_page(&user, 2, 10);
        assert_eq!(key.as_str(), "orders:user:abc:2:10");
        assert_eq!(key.scope(), Some(&CacheScope::user_orders(&user)));
    }

    #[test]
    fn test_scope_does_not_match_longer_user_id() {
        let scope = CacheScope::user_orders(&UserId::new("1"));
        let other = CacheKey::user_orders_page(&UserId::new("10"), 1, 10);
        assert!(!scope.contains(other.as_str()));
        assert!(scope.contains("orders:user:1:1:10"));
    }

    #[test]
    fn test_product_keys_are_exact() {
        let key = CacheKey::product_by_id(&ProductId::new("p1"));
        assert_eq!(key.as_str(), "product:id:p1");
        assert!(key.scope().is_none());
        assert_eq!(CacheKey::product_by_slug("iphone").as_str(), "product:slug:iphone");
    }

    #[test]
    fn test_customer_analytics_normalizes_email() {
        assert_eq!(
            CacheScope::customer_analytics(" Jane@Example.COM "),
            CacheScope::customer_analytics("jane@example.com")
        );
    }

    #[test]
    fn test_listing_keys_share_scope() {
        let a = CacheKey::product_listing("page=1");
        let b = CacheKey::product_listing("page=2&sort=price");
        assert_eq!(a.scope(), b.scope());
        assert_ne!(a, b);
    }
}

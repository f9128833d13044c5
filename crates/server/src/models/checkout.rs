//! Provider-agnostic view of a completed checkout.
//!
//! The Stripe module converts its wire types into these; order creation only
//! ever sees these.

use std::collections::HashMap;

use apple_store_core::{CheckoutSessionId, CustomerId, UserId};

/// Metadata key carrying the internal product id.
pub const PRODUCT_ID_KEY: &str = "productId";
/// Metadata key carrying the JSON-encoded list of selected option ids.
pub const SELECTED_OPTIONS_KEY: &str = "selectedOptions";
/// Customer metadata key carrying the internal user id.
pub const USER_ID_KEY: &str = "userId";

/// A completed checkout session. Immutable once received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub id: CheckoutSessionId,
    pub customer: Option<CustomerId>,
    /// Total charged, in minor units.
    pub amount_total: Option<i64>,
    pub currency: Option<String>,
}

/// One purchased line of a checkout session.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PurchasedItem {
    pub quantity: Option<u64>,
    /// Price per unit, in minor units.
    pub unit_amount: Option<i64>,
    /// Line total after discounts, in minor units.
    pub amount_total: i64,
    /// Product metadata (`productId`, `selectedOptions`).
    pub metadata: HashMap<String, String>,
}

impl PurchasedItem {
    /// Raw metadata value for `key`, ignoring blanks.
    #[must_use]
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }
}

/// A payment-provider customer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Customer {
    pub id: CustomerId,
    pub email: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl Customer {
    /// Internal user id stored on the customer, if it has propagated yet.
    #[must_use]
    pub fn user_id(&self) -> Option<UserId> {
        self.metadata
            .get(USER_ID_KEY)
            .filter(|v| !v.trim().is_empty())
            .map(|v| UserId::new(v.clone()))
    }
}

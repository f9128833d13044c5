//! Order domain types.
//!
//! These types represent validated domain objects separate from database row types.

use std::collections::BTreeSet;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use apple_store_core::{
    CheckoutSessionId, OrderId, OrderItemId, OrderStatus, PaymentMethod, Price, ProductId, UserId,
};

/// Delivery estimate applied to new orders.
pub const ESTIMATED_DELIVERY_DAYS: i64 = 7;

/// A persisted order (aggregate root).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    /// Internal user who placed the order.
    pub user_id: UserId,
    /// Provider checkout session this order was created from.
    pub checkout_session_id: Option<CheckoutSessionId>,
    /// Item references, in line-item order.
    pub items: Vec<OrderItemId>,
    /// Sum of the items' final prices.
    pub calculated_total: Price,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub estimated_delivery: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One purchased product within an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub id: OrderItemId,
    pub order_id: OrderId,
    pub product_id: ProductId,
    pub quantity: u32,
    pub final_price: Price,
    /// Product option ids chosen by the customer (color, storage, ...).
    pub selected_options: BTreeSet<String>,
}

/// An order together with its items.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrderWithItems {
    pub order: Order,
    pub items: Vec<OrderItem>,
}

/// The initial order row written at the start of the transaction.
///
/// Items are attached later in the same transaction, once they exist.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub id: OrderId,
    pub user_id: UserId,
    pub checkout_session_id: Option<CheckoutSessionId>,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub estimated_delivery: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl NewOrder {
    /// A freshly paid card order, in `Preparing`, due in seven days.
    #[must_use]
    pub fn paid_by_card(
        user_id: UserId,
        checkout_session_id: CheckoutSessionId,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: OrderId::generate(),
            user_id,
            checkout_session_id: Some(checkout_session_id),
            status: OrderStatus::Preparing,
            payment_method: PaymentMethod::CreditCard,
            estimated_delivery: now + Duration::days(ESTIMATED_DELIVERY_DAYS),
            created_at: now,
        }
    }

    /// The order as it looks before any items are attached.
    #[must_use]
    pub fn into_order(self) -> Order {
        Order {
            id: self.id,
            user_id: self.user_id,
            checkout_session_id: self.checkout_session_id,
            items: Vec::new(),
            calculated_total: Price::ZERO,
            status: self.status,
            payment_method: self.payment_method,
            estimated_delivery: self.estimated_delivery,
            created_at: self.created_at,
            updated_at: self.created_at,
        }
    }
}

/// An order item ready to insert.
#[derive(Debug, Clone)]
pub struct NewOrderItem {
    pub product_id: ProductId,
    pub quantity: u32,
    pub final_price: Price,
    pub selected_options: BTreeSet<String>,
}

impl NewOrderItem {
    /// Assign an id and attach to `order_id`.
    #[must_use]
    pub fn into_item(self, order_id: OrderId) -> OrderItem {
        OrderItem {
            id: OrderItemId::generate(),
            order_id,
            product_id: self.product_id,
            quantity: self.quantity,
            final_price: self.final_price,
            selected_options: self.selected_options,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paid_by_card_defaults() {
        let now = Utc::now();
        let order = NewOrder::paid_by_card(UserId::new("u1"), CheckoutSessionId::new("cs_1"), now);

        assert_eq!(order.status, OrderStatus::Preparing);
        assert_eq!(order.payment_method, PaymentMethod::CreditCard);
        assert_eq!(order.estimated_delivery - now, Duration::days(7));
        assert_eq!(order.created_at, now);
    }

    #[test]
    fn test_into_order_starts_empty() {
        let new_order =
            NewOrder::paid_by_card(UserId::new("u1"), CheckoutSessionId::new("cs_1"), Utc::now());
        let id = new_order.id;
        let order = new_order.into_order();

        assert_eq!(order.id, id);
        assert!(order.items.is_empty());
        assert_eq!(order.calculated_total, Price::ZERO);
        assert_eq!(order.updated_at, order.created_at);
    }
}

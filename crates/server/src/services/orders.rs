//! Order creation from completed checkouts.
//!
//! An order and its items are written in one transaction:
//! 1. Insert the order with no items and a zero total
//! 2. Insert one item per purchased line
//! 3. Attach the item ids and the summed total to the order
//! 4. Commit
//!
//! Any failure rolls everything back. Readers never see an order without its
//! items or items without their order.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use apple_store_core::{CheckoutSessionId, MoneyError, OrderItemId, Price, ProductId, UserId};

use crate::db::{OrderStore, OrderTransaction, RepositoryError};
use crate::models::checkout::{PRODUCT_ID_KEY, SELECTED_OPTIONS_KEY};
use crate::models::{CheckoutSession, NewOrder, NewOrderItem, Order, OrderWithItems, PurchasedItem};

/// Errors that can occur while creating an order.
#[derive(Debug, Error)]
pub enum OrderError {
    /// The checkout had nothing in it.
    #[error("checkout session has no line items")]
    NoLineItems,

    /// A line item carries no `productId` metadata.
    #[error("line item {index} has no product id")]
    MissingProductId { index: usize },

    /// A line item has a missing, zero, or oversized quantity.
    #[error("line item {index} has invalid quantity {quantity:?}")]
    InvalidQuantity { index: usize, quantity: Option<u64> },

    /// A line item total is not a valid price.
    #[error("line item {index} has invalid price: {source}")]
    InvalidPrice {
        index: usize,
        #[source]
        source: MoneyError,
    },

    /// An order for this checkout session was committed first.
    #[error("checkout session {0} already has an order")]
    Duplicate(CheckoutSessionId),

    /// Storage failed.
    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Creates and looks up orders.
#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn OrderStore>,
}

impl OrderService {
    /// Create a new order service.
    #[must_use]
    pub fn new(store: Arc<dyn OrderStore>) -> Self {
        Self { store }
    }

    /// The order already created from `session_id`, if any.
    ///
    /// # Errors
    ///
    /// Returns error if the store cannot be queried.
    pub async fn find_by_session(
        &self,
        session_id: &CheckoutSessionId,
    ) -> Result<Option<Order>, OrderError> {
        Ok(self.store.find_by_session(session_id).await?)
    }

    /// Persist the order for a completed checkout.
    ///
    /// Line items are validated before any write. The stored total is the sum
    /// of the item prices; a differing session total is logged, not enforced.
    ///
    /// # Errors
    ///
    /// Returns `OrderError::Duplicate` if another delivery of the same session
    /// won the race, a validation error for unusable line items, or the
    /// repository error that aborted the transaction.
    #[instrument(skip(self, session, items), fields(session_id = %session.id, user_id = %user_id))]
    pub async fn create_from_checkout(
        &self,
        user_id: UserId,
        session: &CheckoutSession,
        items: &[PurchasedItem],
    ) -> Result<OrderWithItems, OrderError> {
        let new_items = build_items(items)?;
        let new_order = NewOrder::paid_by_card(user_id, session.id.clone(), Utc::now());

        let mut tx = self.store.begin().await?;
        let written = write_order(tx.as_mut(), new_order, new_items).await;

        let created = match written {
            Ok(created) => {
                tx.commit().await.map_err(|e| conflict_as_duplicate(e, &session.id))?;
                created
            }
            Err(e) => {
                if let Err(rollback_err) = tx.rollback().await {
                    warn!(error = %rollback_err, "Rollback failed");
                }
                return Err(conflict_as_duplicate(e, &session.id));
            }
        };

        if let Some(expected) = session.amount_total
            && Price::from_minor_units(expected).ok() != Some(created.order.calculated_total)
        {
            warn!(
                order_id = %created.order.id,
                session_total = expected,
                calculated_total = %created.order.calculated_total,
                "Order total differs from checkout amount"
            );
        }

        info!(
            order_id = %created.order.id,
            items = created.items.len(),
            total = %created.order.calculated_total,
            "Order created"
        );
        Ok(created)
    }
}

async fn write_order(
    tx: &mut dyn OrderTransaction,
    new_order: NewOrder,
    new_items: Vec<NewOrderItem>,
) -> Result<OrderWithItems, RepositoryError> {
    tx.insert_order(&new_order).await?;

    let order_id = new_order.id;
    let mut items = Vec::with_capacity(new_items.len());
    for new_item in new_items {
        let item = new_item.into_item(order_id);
        tx.insert_item(&item).await?;
        items.push(item);
    }

    let item_ids: Vec<OrderItemId> = items.iter().map(|item| item.id).collect();
    let total: Price = items.iter().map(|item| item.final_price).sum();
    tx.finalize_order(order_id, &item_ids, total).await?;

    let mut order = new_order.into_order();
    order.items = item_ids;
    order.calculated_total = total;
    Ok(OrderWithItems { order, items })
}

fn conflict_as_duplicate(error: RepositoryError, session_id: &CheckoutSessionId) -> OrderError {
    match error {
        RepositoryError::Conflict(_) => OrderError::Duplicate(session_id.clone()),
        other => OrderError::Repository(other),
    }
}

/// Validate purchased lines and turn them into insertable items.
fn build_items(items: &[PurchasedItem]) -> Result<Vec<NewOrderItem>, OrderError> {
    if items.is_empty() {
        return Err(OrderError::NoLineItems);
    }

    items
        .iter()
        .enumerate()
        .map(|(index, item)| {
            let product_id = item
                .metadata_value(PRODUCT_ID_KEY)
                .map(ProductId::new)
                .ok_or(OrderError::MissingProductId { index })?;

            let quantity = item
                .quantity
                .filter(|q| *q > 0)
                .and_then(|q| u32::try_from(q).ok())
                .ok_or(OrderError::InvalidQuantity {
                    index,
                    quantity: item.quantity,
                })?;

            let final_price = Price::from_minor_units(item.amount_total)
                .map_err(|source| OrderError::InvalidPrice { index, source })?;

            Ok(NewOrderItem {
                product_id,
                quantity,
                final_price,
                selected_options: parse_selected_options(item.metadata_value(SELECTED_OPTIONS_KEY)),
            })
        })
        .collect()
}

/// Parse the JSON-encoded option id list stored in product metadata.
///
/// Absent or malformed values yield an empty set.
#[must_use]
pub fn parse_selected_options(raw: Option<&str>) -> BTreeSet<String> {
    let Some(raw) = raw else {
        return BTreeSet::new();
    };
    let options = match serde_json::from_str::<Vec<String>>(raw) {
        Ok(options) => options,
        Err(e) => {
            warn!(error = %e, "Malformed selectedOptions metadata, ignoring");
            return BTreeSet::new();
        }
    };
    options
        .into_iter()
        .filter(|option| {
            let keep = !option.trim().is_empty();
            if !keep {
                debug!("Skipping blank option id");
            }
            keep
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use apple_store_core::CustomerId;

    use super::*;
    use crate::db::InMemoryOrderStore;

    fn session(id: &str, amount_total: i64) -> CheckoutSession {
        CheckoutSession {
            id: CheckoutSessionId::new(id),
            customer: Some(CustomerId::new("cus_1")),
            amount_total: Some(amount_total),
            currency: Some("usd".to_string()),
        }
    }

    fn line(product: &str, quantity: u64, amount_total: i64, options: Option<&str>) -> PurchasedItem {
        let mut metadata = HashMap::new();
        metadata.insert(PRODUCT_ID_KEY.to_string(), product.to_string());
        if let Some(options) = options {
            metadata.insert(SELECTED_OPTIONS_KEY.to_string(), options.to_string());
        }
        PurchasedItem {
            quantity: Some(quantity),
            unit_amount: None,
            amount_total,
            metadata,
        }
    }

    #[test]
    fn test_parse_selected_options() {
        assert!(parse_selected_options(None).is_empty());
        assert!(parse_selected_options(Some("not json")).is_empty());
        assert!(parse_selected_options(Some(r#"{"a":1}"#)).is_empty());

        let options = parse_selected_options(Some(r#"["blue","256gb","blue"]"#));
        assert_eq!(
            options.into_iter().collect::<Vec<_>>(),
            vec!["256gb".to_string(), "blue".to_string()]
        );
    }

    #[tokio::test]
    async fn test_creates_order_with_items() {
        let store = InMemoryOrderStore::new();
        let service = OrderService::new(Arc::new(store.clone()));
        let items = [
            line("p1", 1, 2500, Some(r#"["blue"]"#)),
            line("p2", 2, 1000, None),
        ];

        let created = service
            .create_from_checkout(UserId::new("u1"), &session("cs_1", 3500), &items)
            .await
            .unwrap();

        assert_eq!(created.order.calculated_total.to_string(), "35.00");
        assert_eq!(created.items.len(), 2);
        assert_eq!(created.items[0].final_price.to_string(), "25.00");
        assert_eq!(created.items[1].final_price.to_string(), "10.00");
        assert_eq!(created.items[1].quantity, 2);
        assert!(created.items[1].selected_options.is_empty());

        let stored = store.get(created.order.id).await.unwrap().unwrap();
        assert_eq!(stored.order.items, created.order.items);
        assert_eq!(stored.items, created.items);
    }

    #[tokio::test]
    async fn test_empty_line_items_rejected_before_writing() {
        let store = InMemoryOrderStore::new();
        let service = OrderService::new(Arc::new(store.clone()));

        let result = service
            .create_from_checkout(UserId::new("u1"), &session("cs_1", 0), &[])
            .await;

        assert!(matches!(result, Err(OrderError::NoLineItems)));
        assert_eq!(store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_invalid_line_aborts_whole_order() {
        let store = InMemoryOrderStore::new();
        let service = OrderService::new(Arc::new(store.clone()));
        let mut missing_product = line("p2", 1, 100, None);
        missing_product.metadata.clear();

        let result = service
            .create_from_checkout(
                UserId::new("u1"),
                &session("cs_1", 200),
                &[line("p1", 1, 100, None), missing_product],
            )
            .await;
        assert!(matches!(
            result,
            Err(OrderError::MissingProductId { index: 1 })
        ));

        let result = service
            .create_from_checkout(
                UserId::new("u1"),
                &session("cs_1", 0),
                &[line("p1", 0, 0, None)],
            )
            .await;
        assert!(matches!(
            result,
            Err(OrderError::InvalidQuantity { index: 0, .. })
        ));
        assert_eq!(store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_failure_mid_transaction_leaves_store_unchanged() {
        let store = InMemoryOrderStore::new().with_failing_item_insert(1);
        let service = OrderService::new(Arc::new(store.clone()));
        let items = [line("p1", 1, 100, None), line("p2", 1, 200, None)];

        let result = service
            .create_from_checkout(UserId::new("u1"), &session("cs_1", 300), &items)
            .await;

        assert!(matches!(result, Err(OrderError::Repository(_))));
        assert_eq!(store.order_count().await, 0);
        assert_eq!(store.item_count().await, 0);
    }

    #[tokio::test]
    async fn test_second_create_for_session_is_duplicate() {
        let store = InMemoryOrderStore::new();
        let service = OrderService::new(Arc::new(store.clone()));
        let items = [line("p1", 1, 100, None)];

        service
            .create_from_checkout(UserId::new("u1"), &session("cs_1", 100), &items)
            .await
            .unwrap();
        let result = service
            .create_from_checkout(UserId::new("u1"), &session("cs_1", 100), &items)
            .await;

        assert!(matches!(result, Err(OrderError::Duplicate(_))));
        assert_eq!(store.order_count().await, 1);
        assert_eq!(store.item_count().await, 1);
    }

    #[tokio::test]
    async fn test_total_mismatch_still_stores_item_sum() {
        let store = InMemoryOrderStore::new();
        let service = OrderService::new(Arc::new(store));

        // Shipping charged on top of the items
        let created = service
            .create_from_checkout(
                UserId::new("u1"),
                &session("cs_1", 1500),
                &[line("p1", 1, 1000, None)],
            )
            .await
            .unwrap();

        assert_eq!(created.order.calculated_total.to_string(), "10.00");
    }
}

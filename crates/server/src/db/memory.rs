//! In-memory order store.
//!
//! Used by tests and single-instance development. Transactions stage their
//! writes privately and apply them under one lock on commit, so readers never
//! observe a half-written order.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;

use apple_store_core::{CheckoutSessionId, OrderId, OrderItemId, Price, UserId};

use super::{OrderStore, OrderTransaction, RepositoryError};
use crate::models::{NewOrder, Order, OrderItem, OrderWithItems};

const NO_FAULT: usize = usize::MAX;

#[derive(Debug, Default)]
struct Tables {
    orders: BTreeMap<OrderId, Order>,
    items: BTreeMap<OrderItemId, OrderItem>,
}

impl Tables {
    fn has_session(&self, session_id: &CheckoutSessionId) -> bool {
        self.orders
            .values()
            .any(|o| o.checkout_session_id.as_ref() == Some(session_id))
    }
}

#[derive(Debug)]
struct Faults {
    /// Zero-based index of the item insert that fails, or `NO_FAULT`.
    fail_item_insert_at: AtomicUsize,
    unavailable: AtomicBool,
}

impl Default for Faults {
    fn default() -> Self {
        Self {
            fail_item_insert_at: AtomicUsize::new(NO_FAULT),
            unavailable: AtomicBool::new(false),
        }
    }
}

/// Order store held in process memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderStore {
    tables: Arc<Mutex<Tables>>,
    faults: Arc<Faults>,
}

impl InMemoryOrderStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the `index`th item insert of every later transaction fail.
    #[must_use]
    pub fn with_failing_item_insert(self, index: usize) -> Self {
        self.faults
            .fail_item_insert_at
            .store(index, Ordering::SeqCst);
        self
    }

    /// Mark the store unreachable (or reachable again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.faults.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of committed orders.
    pub async fn order_count(&self) -> usize {
        self.tables.lock().await.orders.len()
    }

    /// Number of committed order items.
    pub async fn item_count(&self) -> usize {
        self.tables.lock().await.items.len()
    }

    /// Every committed order with its items.
    pub async fn snapshot(&self) -> Vec<OrderWithItems> {
        let tables = self.tables.lock().await;
        tables
            .orders
            .values()
            .map(|order| OrderWithItems {
                order: order.clone(),
                items: order
                    .items
                    .iter()
                    .filter_map(|id| tables.items.get(id).cloned())
                    .collect(),
            })
            .collect()
    }

    fn check_available(&self) -> Result<(), RepositoryError> {
        if self.faults.unavailable.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn begin(&self) -> Result<Box<dyn OrderTransaction>, RepositoryError> {
        self.check_available()?;
        let fail_at = self.faults.fail_item_insert_at.load(Ordering::SeqCst);
        Ok(Box::new(InMemoryTransaction {
            tables: Arc::clone(&self.tables),
            orders: BTreeMap::new(),
            items: Vec::new(),
            item_inserts: 0,
            fail_item_insert_at: (fail_at != NO_FAULT).then_some(fail_at),
        }))
    }

    async fn find_by_session(
        &self,
        session_id: &CheckoutSessionId,
    ) -> Result<Option<Order>, RepositoryError> {
        self.check_available()?;
        let tables = self.tables.lock().await;
        Ok(tables
            .orders
            .values()
            .find(|o| o.checkout_session_id.as_ref() == Some(session_id))
            .cloned())
    }

    async fn get(&self, id: OrderId) -> Result<Option<OrderWithItems>, RepositoryError> {
        self.check_available()?;
        let tables = self.tables.lock().await;
        let Some(order) = tables.orders.get(&id) else {
            return Ok(None);
        };
        let items = order
            .items
            .iter()
            .map(|item_id| {
                tables.items.get(item_id).cloned().ok_or_else(|| {
                    RepositoryError::DataCorruption(format!(
                        "order {id} references missing item {item_id}"
                    ))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Some(OrderWithItems {
            order: order.clone(),
            items,
        }))
    }

    async fn list_for_user(
        &self,
        user_id: &UserId,
        page: u32,
        limit: u32,
    ) -> Result<Vec<Order>, RepositoryError> {
        self.check_available()?;
        let tables = self.tables.lock().await;
        let mut orders: Vec<Order> = tables
            .orders
            .values()
            .filter(|o| &o.user_id == user_id)
            .cloned()
            .collect();
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let skip = page.saturating_sub(1) as usize * limit as usize;
        Ok(orders.into_iter().skip(skip).take(limit as usize).collect())
    }

    async fn count_for_user(&self, user_id: &UserId) -> Result<u64, RepositoryError> {
        self.check_available()?;
        let tables = self.tables.lock().await;
        Ok(tables.orders.values().filter(|o| &o.user_id == user_id).count() as u64)
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        self.check_available()
    }
}

struct InMemoryTransaction {
    tables: Arc<Mutex<Tables>>,
    orders: BTreeMap<OrderId, Order>,
    items: Vec<OrderItem>,
    item_inserts: usize,
    fail_item_insert_at: Option<usize>,
}

#[async_trait]
impl OrderTransaction for InMemoryTransaction {
    async fn insert_order(&mut self, order: &NewOrder) -> Result<(), RepositoryError> {
        if let Some(session_id) = &order.checkout_session_id {
            let staged = self
                .orders
                .values()
                .any(|o| o.checkout_session_id.as_ref() == Some(session_id));
            if staged || self.tables.lock().await.has_session(session_id) {
                return Err(RepositoryError::Conflict(
                    "checkout session already has an order".to_owned(),
                ));
            }
        }
        self.orders.insert(order.id, order.clone().into_order());
        Ok(())
    }

    async fn insert_item(&mut self, item: &OrderItem) -> Result<(), RepositoryError> {
        let index = self.item_inserts;
        self.item_inserts += 1;
        if self.fail_item_insert_at == Some(index) {
            return Err(RepositoryError::Unavailable(format!(
                "injected failure on item insert {index}"
            )));
        }
        if !self.orders.contains_key(&item.order_id) {
            return Err(RepositoryError::NotFound);
        }
        self.items.push(item.clone());
        Ok(())
    }

    async fn finalize_order(
        &mut self,
        order_id: OrderId,
        items: &[OrderItemId],
        total: Price,
    ) -> Result<(), RepositoryError> {
        let order = self
            .orders
            .get_mut(&order_id)
            .ok_or(RepositoryError::NotFound)?;
        order.items = items.to_vec();
        order.calculated_total = total;
        order.updated_at = Utc::now();
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
        let this = *self;
        let mut tables = this.tables.lock().await;

        // A concurrent transaction may have committed the same session first
        for order in this.orders.values() {
            if let Some(session_id) = &order.checkout_session_id
                && tables.has_session(session_id)
            {
                return Err(RepositoryError::Conflict(
                    "checkout session already has an order".to_owned(),
                ));
            }
        }

        tables.orders.extend(this.orders);
        tables
            .items
            .extend(this.items.into_iter().map(|item| (item.id, item)));
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), RepositoryError> {
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::BTreeSet;

    use apple_store_core::ProductId;

    use super::*;

    fn new_order(session: &str) -> NewOrder {
        NewOrder::paid_by_card(UserId::new("u1"), CheckoutSessionId::new(session), Utc::now())
    }

    fn item(order_id: OrderId, minor: i64) -> OrderItem {
        OrderItem {
            id: OrderItemId::generate(),
            order_id,
            product_id: ProductId::new("p1"),
            quantity: 1,
            final_price: Price::from_minor_units(minor).unwrap(),
            selected_options: BTreeSet::new(),
        }
    }

    #[tokio::test]
    async fn test_uncommitted_writes_are_invisible() {
        let store = InMemoryOrderStore::new();
        let order = new_order("cs_1");
        let mut tx = store.begin().await.unwrap();
        tx.insert_order(&order).await.unwrap();

        assert_eq!(store.order_count().await, 0);
        assert!(
            store
                .find_by_session(&CheckoutSessionId::new("cs_1"))
                .await
                .unwrap()
                .is_none()
        );

        tx.rollback().await.unwrap();
        assert_eq!(store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_commit_applies_order_and_items() {
        let store = InMemoryOrderStore::new();
        let order = new_order("cs_1");
        let first = item(order.id, 2500);
        let second = item(order.id, 1000);

        let mut tx = store.begin().await.unwrap();
        tx.insert_order(&order).await.unwrap();
        tx.insert_item(&first).await.unwrap();
        tx.insert_item(&second).await.unwrap();
        tx.finalize_order(
            order.id,
            &[first.id, second.id],
            first.final_price + second.final_price,
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let stored = store.get(order.id).await.unwrap().unwrap();
        assert_eq!(stored.order.items, vec![first.id, second.id]);
        assert_eq!(stored.order.calculated_total.to_string(), "35.00");
        assert_eq!(stored.items, vec![first, second]);
    }

    #[tokio::test]
    async fn test_duplicate_session_conflicts() {
        let store = InMemoryOrderStore::new();

        let mut tx = store.begin().await.unwrap();
        tx.insert_order(&new_order("cs_1")).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let result = tx.insert_order(&new_order("cs_1")).await;
        assert!(matches!(result, Err(RepositoryError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_concurrent_commit_of_same_session_conflicts() {
        let store = InMemoryOrderStore::new();

        let mut first = store.begin().await.unwrap();
        let mut second = store.begin().await.unwrap();
        first.insert_order(&new_order("cs_1")).await.unwrap();
        second.insert_order(&new_order("cs_1")).await.unwrap();

        first.commit().await.unwrap();
        let result = second.commit().await;
        assert!(matches!(result, Err(RepositoryError::Conflict(_))));
        assert_eq!(store.order_count().await, 1);
    }

    #[tokio::test]
    async fn test_injected_item_failure() {
        let store = InMemoryOrderStore::new().with_failing_item_insert(1);
        let order = new_order("cs_1");

        let mut tx = store.begin().await.unwrap();
        tx.insert_order(&order).await.unwrap();
        tx.insert_item(&item(order.id, 100)).await.unwrap();
        assert!(tx.insert_item(&item(order.id, 100)).await.is_err());
    }

    #[tokio::test]
    async fn test_list_for_user_pages_newest_first() {
        let store = InMemoryOrderStore::new();
        let base = Utc::now();
        for i in 0..3 {
            let order = NewOrder::paid_by_card(
                UserId::new("u1"),
                CheckoutSessionId::new(format!("cs_{i}")),
                base + chrono::Duration::seconds(i),
            );
            let mut tx = store.begin().await.unwrap();
            tx.insert_order(&order).await.unwrap();
            tx.commit().await.unwrap();
        }

        let page = store.list_for_user(&UserId::new("u1"), 1, 2).await.unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(
            page[0].checkout_session_id,
            Some(CheckoutSessionId::new("cs_2"))
        );

        let rest = store.list_for_user(&UserId::new("u1"), 2, 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(store.count_for_user(&UserId::new("u1")).await.unwrap(), 3);
        assert_eq!(store.count_for_user(&UserId::new("u2")).await.unwrap(), 0);
        assert!(
            store
                .list_for_user(&UserId::new("u2"), 1, 10)
                .await
                .unwrap()
                .is_empty()
        );
    }

    #[tokio::test]
    async fn test_unavailable_store_fails_ping() {
        let store = InMemoryOrderStore::new();
        assert!(store.ping().await.is_ok());
        store.set_unavailable(true);
        assert!(matches!(
            store.ping().await,
            Err(RepositoryError::Unavailable(_))
        ));
    }
}

//! `PostgreSQL` order repository.
//!
//! Queries are built at runtime with `sqlx::query`/`query_as` so the crate
//! compiles without a live database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Transaction};
use tracing::instrument;
use uuid::Uuid;

use apple_store_core::{
    CheckoutSessionId, OrderId, OrderItemId, OrderStatus, PaymentMethod, Price, ProductId, UserId,
};

use super::{OrderStore, OrderTransaction, RepositoryError};
use crate::models::{NewOrder, Order, OrderItem, OrderWithItems};

const ORDER_COLUMNS: &str = "id, user_id, checkout_session_id, item_ids, calculated_total, \
                             status, payment_method, estimated_delivery, created_at, updated_at";

/// Order store backed by `PostgreSQL`.
#[derive(Clone)]
pub struct PgOrderStore {
    pool: PgPool,
}

impl PgOrderStore {
    /// Create a new order store.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderStore for PgOrderStore {
    async fn begin(&self) -> Result<Box<dyn OrderTransaction>, RepositoryError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PgOrderTransaction { tx }))
    }

    #[instrument(skip(self), fields(session_id = %session_id))]
    async fn find_by_session(
        &self,
        session_id: &CheckoutSessionId,
    ) -> Result<Option<Order>, RepositoryError> {
        let row = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE checkout_session_id = $1"
        ))
        .bind(session_id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Order::try_from).transpose()
    }

    #[instrument(skip(self), fields(order_id = %id))]
    async fn get(&self, id: OrderId) -> Result<Option<OrderWithItems>, RepositoryError> {
        let Some(row) = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };
        let order = Order::try_from(row)?;

        let rows = sqlx::query_as::<_, OrderItemRow>(
            r"
            SELECT id, order_id, product_id, quantity, final_price, selected_options
            FROM order_items
            WHERE order_id = $1
            ",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let mut items = rows
            .into_iter()
            .map(OrderItem::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        // Present items in the order the aggregate references them
        items.sort_by_key(|item| {
            order
                .items
                .iter()
                .position(|id| *id == item.id)
                .unwrap_or(usize::MAX)
        });

        Ok(Some(OrderWithItems { order, items }))
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn list_for_user(
        &self,
        user_id: &UserId,
        page: u32,
        limit: u32,
    ) -> Result<Vec<Order>, RepositoryError> {
        let offset = i64::from(page.saturating_sub(1)) * i64::from(limit);

        let rows = sqlx::query_as::<_, OrderRow>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE user_id = $1 \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3"
        ))
        .bind(user_id.as_str())
        .bind(i64::from(limit))
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Order::try_from).collect()
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    async fn count_for_user(&self, user_id: &UserId) -> Result<u64, RepositoryError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM orders WHERE user_id = $1")
            .bind(user_id.as_str())
            .fetch_one(&self.pool)
            .await?;

        u64::try_from(count)
            .map_err(|_| RepositoryError::DataCorruption(format!("negative order count {count}")))
    }

    async fn ping(&self) -> Result<(), RepositoryError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

/// An open `PostgreSQL` transaction.
///
/// Dropping it without committing rolls back.
struct PgOrderTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl OrderTransaction for PgOrderTransaction {
    #[instrument(skip(self, order), fields(order_id = %order.id))]
    async fn insert_order(&mut self, order: &NewOrder) -> Result<(), RepositoryError> {
        sqlx::query(
            r"
            INSERT INTO orders (id, user_id, checkout_session_id, item_ids, calculated_total,
                                status, payment_method, estimated_delivery, created_at, updated_at)
            VALUES ($1, $2, $3, '{}', 0, $4, $5, $6, $7, $7)
            ",
        )
        .bind(order.id)
        .bind(order.user_id.as_str())
        .bind(order.checkout_session_id.as_ref().map(CheckoutSessionId::as_str))
        .bind(order.status.as_str())
        .bind(order.payment_method.as_str())
        .bind(order.estimated_delivery)
        .bind(order.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return RepositoryError::Conflict(
                    "checkout session already has an order".to_owned(),
                );
            }
            RepositoryError::Database(e)
        })?;

        Ok(())
    }

    #[instrument(skip(self, item), fields(order_id = %item.order_id, item_id = %item.id))]
    async fn insert_item(&mut self, item: &OrderItem) -> Result<(), RepositoryError> {
        let quantity = i32::try_from(item.quantity).map_err(|_| {
            RepositoryError::DataCorruption(format!("quantity {} out of range", item.quantity))
        })?;
        let options: Vec<String> = item.selected_options.iter().cloned().collect();

        sqlx::query(
            r"
            INSERT INTO order_items (id, order_id, product_id, quantity, final_price, selected_options)
            VALUES ($1, $2, $3, $4, $5, $6)
            ",
        )
        .bind(item.id)
        .bind(item.order_id)
        .bind(item.product_id.as_str())
        .bind(quantity)
        .bind(item.final_price.amount())
        .bind(options)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    #[instrument(skip(self, items), fields(order_id = %order_id, item_count = items.len()))]
    async fn finalize_order(
        &mut self,
        order_id: OrderId,
        items: &[OrderItemId],
        total: Price,
    ) -> Result<(), RepositoryError> {
        let item_ids: Vec<Uuid> = items.iter().map(OrderItemId::as_uuid).collect();

        let result = sqlx::query(
            r"
            UPDATE orders
            SET item_ids = $2, calculated_total = $3, updated_at = now()
            WHERE id = $1
            ",
        )
        .bind(order_id)
        .bind(item_ids)
        .bind(total.amount())
        .execute(&mut *self.tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), RepositoryError> {
        self.tx.rollback().await?;
        Ok(())
    }
}

// =============================================================================
// Row types
// =============================================================================

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    user_id: String,
    checkout_session_id: Option<String>,
    item_ids: Vec<Uuid>,
    calculated_total: Decimal,
    status: String,
    payment_method: String,
    estimated_delivery: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = RepositoryError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: OrderId::from_uuid(row.id),
            user_id: UserId::new(row.user_id),
            checkout_session_id: row.checkout_session_id.map(CheckoutSessionId::new),
            items: row.item_ids.into_iter().map(OrderItemId::from_uuid).collect(),
            calculated_total: Price::from_decimal(row.calculated_total)
                .map_err(|e| RepositoryError::DataCorruption(format!("order total: {e}")))?,
            status: row
                .status
                .parse::<OrderStatus>()
                .map_err(RepositoryError::DataCorruption)?,
            payment_method: row
                .payment_method
                .parse::<PaymentMethod>()
                .map_err(RepositoryError::DataCorruption)?,
            estimated_delivery: row.estimated_delivery,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct OrderItemRow {
    id: Uuid,
    order_id: Uuid,
    product_id: String,
    quantity: i32,
    final_price: Decimal,
    selected_options: Vec<String>,
}

impl TryFrom<OrderItemRow> for OrderItem {
    type Error = RepositoryError;

    fn try_from(row: OrderItemRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: OrderItemId::from_uuid(row.id),
            order_id: OrderId::from_uuid(row.order_id),
            product_id: ProductId::new(row.product_id),
            quantity: u32::try_from(row.quantity).map_err(|_| {
                RepositoryError::DataCorruption(format!("negative quantity {}", row.quantity))
            })?,
            final_price: Price::from_decimal(row.final_price)
                .map_err(|e| RepositoryError::DataCorruption(format!("item price: {e}")))?,
            selected_options: row.selected_options.into_iter().collect(),
        })
    }
}

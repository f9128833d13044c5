//! Order persistence.
//!
//! # Database
//!
//! ## Tables
//!
//! - `orders` - Order aggregate roots (item ids referenced, not embedded)
//! - `order_items` - Purchased lines, each owned by exactly one order
//!
//! # Transactions
//!
//! Order creation is a multi-statement write. Stores hand out an
//! [`OrderTransaction`]; nothing it writes is visible to readers until
//! [`OrderTransaction::commit`] succeeds, and dropping or rolling it back
//! leaves the store exactly as it was.
//!
//! # Migrations
//!
//! Migrations are stored in `crates/server/migrations/` and run via:
//! ```bash
//! cargo run -p apple-store-cli -- migrate
//! ```

pub mod memory;
pub mod orders;

use std::time::Duration;

use async_trait::async_trait;
use secrecy::ExposeSecret;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use thiserror::Error;

use apple_store_core::{CheckoutSessionId, OrderId, OrderItemId, Price, UserId};

use crate::models::{NewOrder, Order, OrderItem, OrderWithItems};

pub use memory::InMemoryOrderStore;
pub use orders::PgOrderStore;

/// Errors that can occur during repository operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// Database error from sqlx.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Data in the database is corrupted or invalid.
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Requested entity was not found.
    #[error("not found")]
    NotFound,

    /// Constraint violation (e.g., checkout session already has an order).
    #[error("constraint violation: {0}")]
    Conflict(String),

    /// Backing store could not be reached.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// Read and write access to orders.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Start a transaction for a multi-statement write.
    async fn begin(&self) -> Result<Box<dyn OrderTransaction>, RepositoryError>;

    /// The committed order created from `session_id`, if any.
    async fn find_by_session(
        &self,
        session_id: &CheckoutSessionId,
    ) -> Result<Option<Order>, RepositoryError>;

    /// An order and its items.
    async fn get(&self, id: OrderId) -> Result<Option<OrderWithItems>, RepositoryError>;

    /// One page (1-based) of a user's orders, newest first.
    async fn list_for_user(
        &self,
        user_id: &UserId,
        page: u32,
        limit: u32,
    ) -> Result<Vec<Order>, RepositoryError>;

    /// How many orders a user has.
    async fn count_for_user(&self, user_id: &UserId) -> Result<u64, RepositoryError>;

    /// Check the store is reachable.
    async fn ping(&self) -> Result<(), RepositoryError>;
}

/// Uncommitted writes against an [`OrderStore`].
#[async_trait]
pub trait OrderTransaction: Send {
    /// Insert the order row with no items and a zero total.
    async fn insert_order(&mut self, order: &NewOrder) -> Result<(), RepositoryError>;

    /// Insert one item of an order inserted in this transaction.
    async fn insert_item(&mut self, item: &OrderItem) -> Result<(), RepositoryError>;

    /// Attach item references and the computed total to the order.
    async fn finalize_order(
        &mut self,
        order_id: OrderId,
        items: &[OrderItemId],
        total: Price,
    ) -> Result<(), RepositoryError>;

    /// Make every write visible atomically.
    async fn commit(self: Box<Self>) -> Result<(), RepositoryError>;

    /// Discard every write.
    async fn rollback(self: Box<Self>) -> Result<(), RepositoryError>;
}

/// Create a `PostgreSQL` connection pool with sensible defaults.
///
/// # Arguments
///
/// * `database_url` - `PostgreSQL` connection string (wrapped in `SecretString`)
///
/// # Errors
///
/// Returns `sqlx::Error` if the connection cannot be established.
pub async fn create_pool(database_url: &secrecy::SecretString) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url.expose_secret())
        .await
}

/// Run the embedded migrations against `pool`.
///
/// # Errors
///
/// Returns `MigrateError` if a migration fails or the history is inconsistent.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("./migrations").run(pool).await
}

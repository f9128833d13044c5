//! HTTP route handlers.
//!
//! # Route Structure
//!
//! ```text
//! GET  /health            - Liveness check
//! GET  /healthz           - Liveness check, JSON body
//! GET  /health/ready      - Readiness check (order store reachable)
//! POST /checkout/webhook  - Stripe webhook deliveries
//! GET  /orders            - The user's order history (cached)
//! GET  /orders/{id}       - One of the user's orders
//! ```

pub mod checkout;
pub mod health;
pub mod orders;

use axum::Router;

use crate::state::AppState;

/// Build all routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(checkout::router())
        .merge(orders::router())
}

//! Order history for the signed-in user.
//!
//! Sessions are terminated upstream; the gateway forwards the authenticated
//! user id in [`USER_ID_HEADER`].

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, header},
    response::IntoResponse,
    routing::get,
};
use serde::Deserialize;
use tracing::instrument;

use apple_store_core::{OrderId, UserId};

use crate::error::AppError;
use crate::models::OrderWithItems;
use crate::services::history::{DEFAULT_LIMIT, DEFAULT_PAGE};
use crate::state::AppState;

/// Header carrying the authenticated user id.
pub const USER_ID_HEADER: &str = "x-user-id";

/// Create order routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/orders", get(list_orders))
        .route("/orders/{order_id}", get(get_order))
}

/// Query parameters for the order list.
#[derive(Debug, Deserialize)]
pub struct OrdersQuery {
    /// 1-based page number.
    pub page: Option<u32>,
    /// Orders per page.
    pub limit: Option<u32>,
}

fn current_user(headers: &HeaderMap) -> Result<UserId, AppError> {
    headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(UserId::new)
        .ok_or(AppError::Unauthorized("missing user id"))
}

/// GET /orders - One page of the user's orders, newest first.
#[instrument(skip_all)]
async fn list_orders(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<OrdersQuery>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = current_user(&headers)?;
    let body = state
        .history()
        .page(
            &user_id,
            query.page.unwrap_or(DEFAULT_PAGE),
            query.limit.unwrap_or(DEFAULT_LIMIT),
        )
        .await?;

    Ok(([(header::CONTENT_TYPE, "application/json")], body))
}

/// GET /orders/{order_id} - One of the user's orders with its items.
#[instrument(skip_all, fields(order_id = %order_id))]
async fn get_order(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(order_id): Path<OrderId>,
) -> Result<Json<OrderWithItems>, AppError> {
    let user_id = current_user(&headers)?;
    state
        .history()
        .order(&user_id, order_id)
        .await?
        .map(Json)
        .ok_or(AppError::NotFound)
}

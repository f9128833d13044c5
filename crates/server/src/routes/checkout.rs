//! Checkout webhook handler.
//!
//! The body is taken as raw bytes: the signature covers the exact bytes Stripe
//! sent, so it must be verified before any JSON parsing.

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::HeaderMap,
    routing::post,
};
use serde::Serialize;
use tracing::instrument;

use crate::error::AppError;
use crate::state::AppState;
use crate::stripe::SIGNATURE_HEADER;

/// Create checkout routes.
pub fn router() -> Router<AppState> {
    Router::new().route("/checkout/webhook", post(handle_webhook))
}

/// Acknowledgement returned to Stripe.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub received: bool,
}

/// Handle a Stripe webhook delivery.
#[instrument(skip_all, fields(body_len = body.len()))]
async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookResponse>, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    let outcome = state.webhook().handle(&body, signature).await?;

    Ok(Json(WebhookResponse {
        received: outcome.received(),
    }))
}

//! Stripe integration.
//!
//! Provides:
//! - [`StripeClient`] for the REST lookups order creation needs
//! - Wire types for webhook events, checkout sessions, line items, and customers
//! - Webhook signature verification
//!
//! # API Reference
//!
//! - Base URL: `https://api.stripe.com` (overridable via `STRIPE_API_BASE`)
//! - Authentication: secret key via `Authorization: Bearer <key>`
//! - Webhooks: `Stripe-Signature: t=<unix>,v1=<hex>` over `"<t>.<raw body>"`

mod client;
pub mod signature;
mod types;

pub use client::StripeClient;
pub use signature::{SIGNATURE_HEADER, SignatureError};
pub use types::{
    CHECKOUT_SESSION_COMPLETED, Event, EventData, Expandable, LineItem, LineItemPrice, List,
    StripeCheckoutSession, StripeCustomer, StripeProduct,
};

use async_trait::async_trait;
use thiserror::Error;

use apple_store_core::{CheckoutSessionId, CustomerId};

use crate::models::{Customer, PurchasedItem};

/// Errors that can occur when interacting with the Stripe API.
#[derive(Debug, Error)]
pub enum StripeError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// API returned an error response.
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// Rate limited by Stripe.
    #[error("Rate limited, retry after {0} seconds")]
    RateLimited(u64),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Unauthorized (invalid secret key).
    #[error("Unauthorized: invalid API key")]
    Unauthorized,

    /// Failed to parse response.
    #[error("Parse error: {0}")]
    Parse(String),

    /// Client misconfigured.
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Lookups against the payment provider needed to turn a completed checkout
/// into an order.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    /// Every purchased line of a checkout session, in session order.
    async fn list_line_items(
        &self,
        session_id: &CheckoutSessionId,
    ) -> Result<Vec<PurchasedItem>, StripeError>;

    /// A customer by provider id.
    async fn retrieve_customer(&self, customer_id: &CustomerId) -> Result<Customer, StripeError>;
}

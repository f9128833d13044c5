//! Business logic services.
//!
//! # Services
//!
//! - `history` - Reads a user's orders through the cache
//! - `orders` - Turns a completed checkout into a persisted order, atomically
//! - `webhook` - Verifies and routes payment-provider webhook deliveries

pub mod history;
pub mod orders;
pub mod webhook;

pub use history::{HistoryError, OrderHistoryService};
pub use orders::{OrderError, OrderService, parse_selected_options};
pub use webhook::{WebhookError, WebhookOutcome, WebhookService};

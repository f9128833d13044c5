//! Domain models for the checkout pipeline.
//!
//! - [`order`] - Orders and order items as persisted
//! - [`checkout`] - Provider-agnostic view of a completed checkout

pub mod checkout;
pub mod order;

pub use checkout::{CheckoutSession, Customer, PurchasedItem};
pub use order::{NewOrder, NewOrderItem, Order, OrderItem, OrderWithItems};

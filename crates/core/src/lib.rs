//! Apple Store Core - Shared domain types.
//!
//! This crate provides the types shared by every Apple Store component:
//! - `server` - Checkout webhook ingestion, order persistence, cache invalidation
//! - `cli` - Migrations and operator tooling
//!
//! # Architecture
//!
//! The core crate contains only types and traits - no I/O, no database access,
//! no HTTP clients. This keeps it lightweight and allows it to be used anywhere.
//!
//! # Modules
//!
//! - [`types`] - Newtype IDs, money conversion, order status state machine
//! - [`events`] - Domain event channels and their payloads
//! - [`cache`] - Cache key namespace and invalidation scopes

#![cfg_attr(not(test), forbid(unsafe_code))]

pub mod cache;
pub mod events;
pub mod types;

pub use cache::{CacheKey, CacheScope};
pub use events::{Channel, UnknownChannel};
pub use types::*;

//! Domain event bus.
//!
//! # Flow
//!
//! 1. A write path commits, then publishes on a [`Channel`] through an
//!    [`EventPublisher`] (fire-and-forget)
//! 2. The subscriber side (Redis pub/sub, or in-process in single-instance
//!    mode) hands each message to the [`EventDispatcher`]
//! 3. The dispatcher runs the handlers registered for that channel in the
//!    [`EventRegistry`], in registration order, one message at a time
//!
//! Delivery is at-most-once with no replay. Subscribers that are down when a
//! message is published never see it.

mod dispatcher;
mod local;
mod redis;
mod registry;

pub use dispatcher::EventDispatcher;
pub use local::LocalEventBus;
pub use redis::RedisEventBus;
pub use registry::{EventHandler, EventRegistry};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use apple_store_core::Channel;

/// Errors that can occur when publishing or subscribing.
#[derive(Debug, Error)]
pub enum EventError {
    /// Redis command or connection failed.
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    /// Payload could not be serialized.
    #[error("payload serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The dispatcher for the channel has stopped.
    #[error("dispatcher for {0} has shut down")]
    Closed(Channel),
}

/// Publishes domain events.
#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish a raw JSON payload on `channel`.
    async fn publish(&self, channel: Channel, payload: String) -> Result<(), EventError>;
}

/// Serialize and publish `payload`, logging instead of failing.
///
/// Publishing happens after the triggering write has committed, so a failure
/// here must never surface to the caller.
pub async fn publish_event<T>(publisher: &dyn EventPublisher, channel: Channel, payload: &T)
where
    T: Serialize + Sync,
{
    let payload = match serde_json::to_string(payload) {
        Ok(payload) => payload,
        Err(e) => {
            warn!(%channel, error = %e, "Failed to serialize event payload");
            return;
        }
    };

    match publisher.publish(channel, payload).await {
        Ok(()) => debug!(%channel, "Event published"),
        Err(e) => warn!(%channel, error = %e, "Failed to publish event"),
    }
}

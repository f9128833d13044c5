//! In-process event bus for single-instance mode and tests.

use async_trait::async_trait;

use apple_store_core::Channel;

use super::{EventDispatcher, EventError, EventPublisher};

/// Publishes straight into a local [`EventDispatcher`].
///
/// Only handlers in this process see the events.
#[derive(Clone, Debug)]
pub struct LocalEventBus {
    dispatcher: EventDispatcher,
}

impl LocalEventBus {
    #[must_use]
    pub const fn new(dispatcher: EventDispatcher) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl EventPublisher for LocalEventBus {
    async fn publish(&self, channel: Channel, payload: String) -> Result<(), EventError> {
        self.dispatcher.dispatch(channel, payload)
    }
}

//! Per-channel worker tasks.
//!
//! Each channel gets its own task fed by an unbounded queue, so messages on
//! one channel are handled strictly in arrival order while different channels
//! make progress independently.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info_span, Instrument};

use apple_store_core::Channel;

use super::{EventError, EventHandler, EventRegistry};

/// Routes payloads to the worker task of their channel.
///
/// Cheap to clone. Workers stop once every clone has been dropped and their
/// queues are drained.
#[derive(Clone, Debug)]
pub struct EventDispatcher {
    senders: Arc<HashMap<Channel, mpsc::UnboundedSender<String>>>,
}

impl EventDispatcher {
    /// Spawn one worker per channel in `registry`.
    ///
    /// Returns the dispatcher and the worker tasks; awaiting the set after the
    /// dispatcher is dropped waits for queued messages to finish.
    #[must_use]
    pub fn start(registry: EventRegistry) -> (Self, JoinSet<()>) {
        let mut tasks = JoinSet::new();
        let mut senders = HashMap::new();

        for (channel, handlers) in registry.into_handlers() {
            let (tx, rx) = mpsc::unbounded_channel();
            senders.insert(channel, tx);
            tasks.spawn(
                run_worker(channel, handlers, rx)
                    .instrument(info_span!("event_worker", channel = %channel)),
            );
        }

        (
            Self {
                senders: Arc::new(senders),
            },
            tasks,
        )
    }

    /// Channels that have a worker.
    #[must_use]
    pub fn channels(&self) -> Vec<Channel> {
        let mut channels: Vec<Channel> = self.senders.keys().copied().collect();
        channels.sort();
        channels
    }

    /// Queue `payload` for the handlers of `channel`.
    ///
    /// Payloads on channels with no handlers are dropped.
    ///
    /// # Errors
    ///
    /// Returns `EventError::Closed` if the channel's worker has stopped.
    pub fn dispatch(&self, channel: Channel, payload: String) -> Result<(), EventError> {
        let Some(sender) = self.senders.get(&channel) else {
            debug!(%channel, "No handlers registered, dropping event");
            return Ok(());
        };
        sender.send(payload).map_err(|_| EventError::Closed(channel))
    }
}

async fn run_worker(
    channel: Channel,
    handlers: Vec<EventHandler>,
    mut rx: mpsc::UnboundedReceiver<String>,
) {
    while let Some(payload) = rx.recv().await {
        for handler in &handlers {
            // A panicking handler must not take the channel down with it
            if AssertUnwindSafe(handler(payload.clone()))
                .catch_unwind()
                .await
                .is_err()
            {
                error!(%channel, "Event handler panicked");
            }
        }
    }
    debug!(%channel, "Event worker stopped");
}

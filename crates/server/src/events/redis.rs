//! Redis pub/sub event bus.
//!
//! Publishing goes through a shared [`ConnectionManager`], which reconnects on
//! its own. Subscribing needs a dedicated connection; [`RedisEventBus::run_subscriber`]
//! owns it and re-establishes it with backoff until shutdown.

use std::time::Duration;

use ::redis::AsyncCommands;
use ::redis::aio::ConnectionManager;
use async_trait::async_trait;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use apple_store_core::Channel;

use super::{EventDispatcher, EventError, EventPublisher};

const INITIAL_BACKOFF: Duration = Duration::from_millis(500);
const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Event bus over Redis pub/sub.
#[derive(Clone)]
pub struct RedisEventBus {
    client: ::redis::Client,
    publisher: ConnectionManager,
}

impl RedisEventBus {
    /// Connect the publishing side.
    ///
    /// # Errors
    ///
    /// Returns error if the URL is invalid or Redis cannot be reached.
    pub async fn connect(url: &SecretString) -> Result<Self, EventError> {
        let client = ::redis::Client::open(url.expose_secret())?;
        let publisher = ConnectionManager::new(client.clone()).await?;
        info!("Connected to Redis event bus");
        Ok(Self { client, publisher })
    }

    /// Forward every message on `dispatcher`'s channels to it until
    /// `shutdown` flips to `true`.
    ///
    /// Connection loss is logged and retried with exponential backoff;
    /// messages published while disconnected are lost.
    pub async fn run_subscriber(
        &self,
        dispatcher: EventDispatcher,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let channels = dispatcher.channels();
        let mut backoff = INITIAL_BACKOFF;

        loop {
            // A dropped sender also means shutdown
            if *shutdown.borrow() || shutdown.has_changed().is_err() {
                break;
            }

            match self.subscribe_once(&channels, &dispatcher, &mut shutdown).await {
                Ok(SubscriberExit::Shutdown) => break,
                Ok(SubscriberExit::Disconnected) => {
                    warn!("Redis subscription stream ended, reconnecting");
                    backoff = INITIAL_BACKOFF;
                }
                Err(e) => {
                    warn!(error = %e, ?backoff, "Redis subscriber failed");
                }
            }

            tokio::select! {
                () = tokio::time::sleep(backoff) => {}
                _ = shutdown.changed() => {}
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }

        info!("Redis subscriber stopped");
    }

    #[instrument(skip_all, fields(channels = channels.len()))]
    async fn subscribe_once(
        &self,
        channels: &[Channel],
        dispatcher: &EventDispatcher,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SubscriberExit, EventError> {
        let mut pubsub = self.client.get_async_pubsub().await?;
        for channel in channels {
            pubsub.subscribe(channel.as_str()).await?;
        }
        info!("Subscribed to event channels");

        let mut messages = std::pin::pin!(pubsub.on_message());
        loop {
            tokio::select! {
                message = messages.next() => {
                    let Some(message) = message else {
                        return Ok(SubscriberExit::Disconnected);
                    };
                    forward(dispatcher, &message)?;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(SubscriberExit::Shutdown);
                    }
                }
            }
        }
    }
}

enum SubscriberExit {
    Shutdown,
    Disconnected,
}

fn forward(dispatcher: &EventDispatcher, message: &::redis::Msg) -> Result<(), EventError> {
    let name = message.get_channel_name();
    let Ok(channel) = name.parse::<Channel>() else {
        debug!(channel = name, "Ignoring message on unknown channel");
        return Ok(());
    };
    let payload: String = match message.get_payload() {
        Ok(payload) => payload,
        Err(e) => {
            debug!(%channel, error = %e, "Dropping non-text payload");
            return Ok(());
        }
    };
    dispatcher.dispatch(channel, payload)
}

#[async_trait]
impl EventPublisher for RedisEventBus {
    #[instrument(skip(self, payload), fields(channel = %channel))]
    async fn publish(&self, channel: Channel, payload: String) -> Result<(), EventError> {
        let mut conn = self.publisher.clone();
        let receivers: i64 = conn.publish(channel.as_str(), payload).await?;
        debug!(receivers, "Published event");
        Ok(())
    }
}

impl std::fmt::Debug for RedisEventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisEventBus").finish_non_exhaustive()
    }
}

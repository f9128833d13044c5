//! Channel to handler table.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;

use apple_store_core::Channel;

/// A subscriber callback. Receives the raw JSON payload.
pub type EventHandler = Arc<dyn Fn(String) -> BoxFuture<'static, ()> + Send + Sync>;

/// Handlers per channel, built once at startup.
#[derive(Clone, Default)]
pub struct EventRegistry {
    handlers: BTreeMap<Channel, Vec<EventHandler>>,
}

impl EventRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `handler` to the handlers of `channel`.
    pub fn on<F, Fut>(&mut self, channel: Channel, handler: F) -> &mut Self
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let handler: EventHandler = Arc::new(move |payload| handler(payload).boxed());
        self.handlers.entry(channel).or_default().push(handler);
        self
    }

    /// Channels with at least one handler.
    #[must_use]
    pub fn channels(&self) -> Vec<Channel> {
        self.handlers.keys().copied().collect()
    }

    /// Number of handlers on `channel`.
    #[must_use]
    pub fn handler_count(&self, channel: Channel) -> usize {
        self.handlers.get(&channel).map_or(0, Vec::len)
    }

    /// Handlers on `channel`, in registration order.
    #[must_use]
    pub fn handlers(&self, channel: Channel) -> &[EventHandler] {
        self.handlers.get(&channel).map(Vec::as_slice).unwrap_or_default()
    }

    /// Run every handler of `channel` on `payload`, in registration order.
    pub async fn dispatch(&self, channel: Channel, payload: &str) {
        for handler in self.handlers(channel) {
            handler(payload.to_owned()).await;
        }
    }

    pub(crate) fn into_handlers(self) -> BTreeMap<Channel, Vec<EventHandler>> {
        self.handlers
    }
}

impl std::fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_map()
            .entries(self.handlers.iter().map(|(c, h)| (c.as_str(), h.len())))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[tokio::test]
    async fn test_dispatch_runs_handlers_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut registry = EventRegistry::new();

        for tag in ["first", "second"] {
            let seen = Arc::clone(&seen);
            registry.on(Channel::UserOrderModified, move |payload| {
                let seen = Arc::clone(&seen);
                async move {
                    if let Ok(mut seen) = seen.lock() {
                        seen.push(format!("{tag}:{payload}"));
                    }
                }
            });
        }

        registry.dispatch(Channel::UserOrderModified, "p").await;
        registry.dispatch(Channel::ProductCreated, "ignored").await;

        let seen = seen.lock().map(|s| s.clone()).unwrap_or_default();
        assert_eq!(seen, vec!["first:p", "second:p"]);
    }

    #[test]
    fn test_channels_and_counts() {
        let mut registry = EventRegistry::new();
        registry
            .on(Channel::UserDeleted, |_| async {})
            .on(Channel::ProductCreated, |_| async {})
            .on(Channel::ProductCreated, |_| async {});

        assert_eq!(
            registry.channels(),
            vec![Channel::ProductCreated, Channel::UserDeleted]
        );
        assert_eq!(registry.handler_count(Channel::ProductCreated), 2);
        assert_eq!(registry.handler_count(Channel::SendEmail), 0);
        assert_eq!(
            format!("{registry:?}"),
            r#"{"product-created": 2, "user-deleted": 1}"#
        );
    }
}

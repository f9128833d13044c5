//! Application state shared across handlers.

use std::sync::Arc;

use crate::cache::CacheStore;
use crate::config::StripeConfig;
use crate::db::OrderStore;
use crate::events::EventPublisher;
use crate::services::{OrderHistoryService, OrderService, WebhookService};
use crate::stripe::PaymentProvider;

/// Application state shared across all handlers.
///
/// Every client is constructed by the caller and injected here, so tests can
/// swap in in-memory implementations.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    store: Arc<dyn OrderStore>,
    webhook: WebhookService,
    history: OrderHistoryService,
}

impl AppState {
    /// Wire the services from their dependencies.
    #[must_use]
    pub fn new(
        store: Arc<dyn OrderStore>,
        provider: Arc<dyn PaymentProvider>,
        events: Arc<dyn EventPublisher>,
        cache: Arc<dyn CacheStore>,
        stripe: &StripeConfig,
    ) -> Self {
        let webhook = WebhookService::new(
            OrderService::new(Arc::clone(&store)),
            provider,
            events,
            stripe.webhook_secret.clone(),
            stripe.webhook_tolerance,
        );
        let history = OrderHistoryService::new(Arc::clone(&store), cache);
        Self {
            inner: Arc::new(AppStateInner {
                store,
                webhook,
                history,
            }),
        }
    }

    /// Order storage.
    #[must_use]
    pub fn store(&self) -> &dyn OrderStore {
        self.inner.store.as_ref()
    }

    /// Webhook processing.
    #[must_use]
    pub fn webhook(&self) -> &WebhookService {
        &self.inner.webhook
    }

    /// Cached order history reads.
    #[must_use]
    pub fn history(&self) -> &OrderHistoryService {
        &self.inner.history
    }
}

//! Payment webhook handling.
//!
//! # Responses
//!
//! | Outcome                                   | Status | Body                |
//! |-------------------------------------------|--------|---------------------|
//! | Missing/invalid signature, bad JSON       | 400    | error text          |
//! | Event type other than checkout completed  | 200    | `{received: false}` |
//! | Order created, or session already ordered | 200    | `{received: true}`  |
//! | No user reference, provider or DB failure | 500    | error text          |
//!
//! A 5xx makes the provider redeliver later, which is what we want for
//! transient failures and for customers whose `userId` metadata has not
//! propagated yet.

use std::sync::Arc;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use apple_store_core::events::UserOrderModified;
use apple_store_core::{Channel, CheckoutSessionId, OrderId};

use super::orders::{OrderError, OrderService};
use crate::events::{EventPublisher, publish_event};
use crate::stripe::{Event, PaymentProvider, SignatureError, StripeError, signature};

/// What a delivery resulted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// A new order was committed.
    OrderCreated(OrderId),
    /// The session already has an order; nothing was written.
    Duplicate,
    /// Not an event this endpoint acts on.
    Ignored,
}

impl WebhookOutcome {
    /// Value of the `received` field in the response body.
    #[must_use]
    pub const fn received(&self) -> bool {
        !matches!(self, Self::Ignored)
    }
}

/// Errors that can occur while handling a delivery.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Signature missing or invalid.
    #[error("webhook signature rejected: {0}")]
    Signature(#[from] SignatureError),

    /// Body is not a valid event.
    #[error("invalid webhook payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// The customer carries no internal user id (yet).
    #[error("checkout session {0} has no customer user reference")]
    MissingUserReference(CheckoutSessionId),

    /// Payment provider lookup failed.
    #[error("payment provider error: {0}")]
    Provider(#[from] StripeError),

    /// Order could not be persisted.
    #[error("order persistence failed: {0}")]
    Order(#[from] OrderError),
}

impl WebhookError {
    /// Whether the delivery itself is bad (as opposed to us failing).
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::Signature(_) | Self::Payload(_))
    }
}

/// Verifies webhook deliveries and creates orders from completed checkouts.
#[derive(Clone)]
pub struct WebhookService {
    orders: OrderService,
    provider: Arc<dyn PaymentProvider>,
    events: Arc<dyn EventPublisher>,
    secret: SecretString,
    tolerance: Duration,
}

impl WebhookService {
    /// Create a new webhook service.
    #[must_use]
    pub fn new(
        orders: OrderService,
        provider: Arc<dyn PaymentProvider>,
        events: Arc<dyn EventPublisher>,
        secret: SecretString,
        tolerance: Duration,
    ) -> Self {
        Self {
            orders,
            provider,
            events,
            secret,
            tolerance,
        }
    }

    /// Handle one delivery.
    ///
    /// # Arguments
    ///
    /// * `payload` - The raw request body
    /// * `signature_header` - The `Stripe-Signature` header, if sent
    ///
    /// # Errors
    ///
    /// Returns `WebhookError`; see the module docs for how each maps to a
    /// response.
    pub async fn handle(
        &self,
        payload: &[u8],
        signature_header: Option<&str>,
    ) -> Result<WebhookOutcome, WebhookError> {
        let header = signature_header.ok_or(SignatureError::MissingHeader)?;
        signature::verify(
            payload,
            header,
            self.secret.expose_secret(),
            self.tolerance,
            chrono::Utc::now().timestamp(),
        )?;

        let event: Event = serde_json::from_slice(payload)?;
        if !event.is_checkout_completed() {
            debug!(event_id = %event.id, event_type = %event.event_type, "Ignoring webhook event");
            return Ok(WebhookOutcome::Ignored);
        }

        self.handle_checkout_completed(&event).await
    }

    #[instrument(skip(self, event), fields(event_id = %event.id, session_id = tracing::field::Empty))]
    async fn handle_checkout_completed(&self, event: &Event) -> Result<WebhookOutcome, WebhookError> {
        let session = event.checkout_session()?;
        tracing::Span::current().record("session_id", session.id.as_str());

        if let Some(existing) = self.orders.find_by_session(&session.id).await? {
            info!(order_id = %existing.id, "Checkout session already has an order");
            return Ok(WebhookOutcome::Duplicate);
        }

        let items = self.provider.list_line_items(&session.id).await?;

        let Some(customer_id) = session.customer.as_ref() else {
            error!("Checkout session has no customer");
            return Err(WebhookError::MissingUserReference(session.id.clone()));
        };
        let customer = self.provider.retrieve_customer(customer_id).await?;
        let Some(user_id) = customer.user_id() else {
            error!(customer_id = %customer_id, "Customer has no userId metadata");
            return Err(WebhookError::MissingUserReference(session.id.clone()));
        };

        let created = match self
            .orders
            .create_from_checkout(user_id.clone(), &session, &items)
            .await
        {
            Ok(created) => created,
            Err(OrderError::Duplicate(_)) => {
                info!("Concurrent delivery created the order first");
                return Ok(WebhookOutcome::Duplicate);
            }
            Err(e) => {
                warn!(error = %e, "Order creation failed");
                return Err(e.into());
            }
        };

        publish_event(
            self.events.as_ref(),
            Channel::UserOrderModified,
            &UserOrderModified {
                user_id,
                email: customer.email,
            },
        )
        .await;

        Ok(WebhookOutcome::OrderCreated(created.order.id))
    }
}

impl std::fmt::Debug for WebhookService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookService")
            .field("tolerance", &self.tolerance)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::Mutex;

    use apple_store_core::{CustomerId, UserId};

    use super::*;
    use crate::db::InMemoryOrderStore;
    use crate::events::EventError;
    use crate::models::checkout::{PRODUCT_ID_KEY, USER_ID_KEY};
    use crate::models::{Customer, PurchasedItem};

    const SECRET: &str = "whsec_test_aB3xY9mK2nL5pQ7rT0uW4zC6";

    struct StubProvider {
        user_id: Option<&'static str>,
    }

    #[async_trait]
    impl PaymentProvider for StubProvider {
        async fn list_line_items(
            &self,
            _session_id: &CheckoutSessionId,
        ) -> Result<Vec<PurchasedItem>, StripeError> {
            let mut metadata = HashMap::new();
            metadata.insert(PRODUCT_ID_KEY.to_string(), "p1".to_string());
            Ok(vec![PurchasedItem {
                quantity: Some(1),
                unit_amount: Some(2500),
                amount_total: 2500,
                metadata,
            }])
        }

        async fn retrieve_customer(&self, customer_id: &CustomerId) -> Result<Customer, StripeError> {
            let mut metadata = HashMap::new();
            if let Some(user_id) = self.user_id {
                metadata.insert(USER_ID_KEY.to_string(), user_id.to_string());
            }
            Ok(Customer {
                id: customer_id.clone(),
                email: Some("buyer@example.com".to_string()),
                metadata,
            })
        }
    }

    #[derive(Default)]
    struct RecordingPublisher {
        sent: Mutex<Vec<(Channel, String)>>,
    }

    #[async_trait]
    impl EventPublisher for RecordingPublisher {
        async fn publish(&self, channel: Channel, payload: String) -> Result<(), EventError> {
            self.sent.lock().await.push((channel, payload));
            Ok(())
        }
    }

    fn service(
        store: &InMemoryOrderStore,
        user_id: Option<&'static str>,
        events: Arc<RecordingPublisher>,
    ) -> WebhookService {
        WebhookService::new(
            OrderService::new(Arc::new(store.clone())),
            Arc::new(StubProvider { user_id }),
            events,
            SecretString::from(SECRET),
            Duration::from_secs(300),
        )
    }

    fn completed_event(session_id: &str) -> Vec<u8> {
        serde_json::to_vec(&json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "data": {"object": {"id": session_id, "customer": "cus_1", "amount_total": 2500}}
        }))
        .unwrap()
    }

    fn sign(payload: &[u8]) -> String {
        signature::sign(payload, SECRET, chrono::Utc::now().timestamp())
    }

    #[tokio::test]
    async fn test_creates_order_and_publishes() {
        let store = InMemoryOrderStore::new();
        let events = Arc::new(RecordingPublisher::default());
        let service = service(&store, Some("u1"), events.clone());
        let payload = completed_event("cs_1");

        let outcome = service.handle(&payload, Some(&sign(&payload))).await.unwrap();

        assert!(matches!(outcome, WebhookOutcome::OrderCreated(_)));
        assert_eq!(store.order_count().await, 1);
        let sent = events.sent.lock().await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].0, Channel::UserOrderModified);
        let payload: UserOrderModified = serde_json::from_str(&sent[0].1).unwrap();
        assert_eq!(payload.user_id, UserId::new("u1"));
        assert_eq!(payload.email.as_deref(), Some("buyer@example.com"));
    }

    #[tokio::test]
    async fn test_redelivery_is_duplicate_and_silent() {
        let store = InMemoryOrderStore::new();
        let events = Arc::new(RecordingPublisher::default());
        let service = service(&store, Some("u1"), events.clone());
        let payload = completed_event("cs_1");

        service.handle(&payload, Some(&sign(&payload))).await.unwrap();
        let outcome = service.handle(&payload, Some(&sign(&payload))).await.unwrap();

        assert_eq!(outcome, WebhookOutcome::Duplicate);
        assert!(outcome.received());
        assert_eq!(store.order_count().await, 1);
        assert_eq!(events.sent.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_signature() {
        let store = InMemoryOrderStore::new();
        let service = service(&store, Some("u1"), Arc::default());

        let err = service
            .handle(&completed_event("cs_1"), None)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            WebhookError::Signature(SignatureError::MissingHeader)
        ));
        assert!(err.is_client_error());
        assert_eq!(store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_missing_user_reference() {
        let store = InMemoryOrderStore::new();
        let events = Arc::new(RecordingPublisher::default());
        let service = service(&store, None, events.clone());
        let payload = completed_event("cs_1");

        let err = service
            .handle(&payload, Some(&sign(&payload)))
            .await
            .unwrap_err();

        assert!(matches!(err, WebhookError::MissingUserReference(_)));
        assert!(!err.is_client_error());
        assert_eq!(store.order_count().await, 0);
        assert!(events.sent.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_other_event_types_ignored() {
        let store = InMemoryOrderStore::new();
        let service = service(&store, Some("u1"), Arc::default());
        let payload = serde_json::to_vec(&json!({
            "id": "evt_2",
            "type": "payment_intent.succeeded",
            "data": {"object": {"id": "pi_1"}}
        }))
        .unwrap();

        let outcome = service.handle(&payload, Some(&sign(&payload))).await.unwrap();

        assert_eq!(outcome, WebhookOutcome::Ignored);
        assert!(!outcome.received());
    }

    #[tokio::test]
    async fn test_signed_garbage_is_payload_error() {
        let store = InMemoryOrderStore::new();
        let service = service(&store, Some("u1"), Arc::default());
        let payload = b"not json".to_vec();

        let err = service
            .handle(&payload, Some(&sign(&payload)))
            .await
            .unwrap_err();
        assert!(matches!(err, WebhookError::Payload(_)));
    }
}

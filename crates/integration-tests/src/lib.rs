//! Integration test harness for Apple Store.
//!
//! Builds the full router in-process against the in-memory order store, a
//! fake payment provider, the local event bus, the moka cache and a recording
//! mailer, so the webhook-to-invalidation path runs end to end without
//! external services.
//!
//! # Running Tests
//!
//! ```bash
//! # In-process tests
//! cargo test -p apple-store-integration-tests
//!
//! # Including the PostgreSQL and Redis tests
//! DATABASE_URL=postgres://localhost/apple_store_test \
//! REDIS_URL=redis://127.0.0.1:6379 \
//!   cargo test -p apple-store-integration-tests -- --include-ignored
//! ```

#![allow(clippy::unwrap_used, clippy::missing_panics_doc)]

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use apple_store_core::events::EmailMessage;
use apple_store_core::{CheckoutSessionId, CustomerId};
use apple_store_server::cache::{CacheStore, MokaCacheStore, register_invalidation_workers};
use apple_store_server::config::StripeConfig;
use apple_store_server::db::{InMemoryOrderStore, OrderStore};
use apple_store_server::events::{EventDispatcher, EventRegistry, LocalEventBus};
use apple_store_server::models::checkout::{PRODUCT_ID_KEY, SELECTED_OPTIONS_KEY, USER_ID_KEY};
use apple_store_server::models::{Customer, PurchasedItem};
use apple_store_server::notifications::{EmailError, Mailer, register_email_worker};
use apple_store_server::routes::orders::USER_ID_HEADER;
use apple_store_server::state::AppState;
use apple_store_server::stripe::{PaymentProvider, SIGNATURE_HEADER, StripeError, signature};
use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use secrecy::SecretString;
use serde_json::{Value, json};
use tokio::task::JoinSet;
use tower::ServiceExt;

pub const WEBHOOK_SECRET: &str = "whsec_test_Qm8vR2xT5nK9pW3yB7cF1dH4";
pub const CUSTOMER_ID: &str = "cus_test_1";
pub const USER_ID: &str = "user_42";
pub const EMAIL: &str = "ada@example.com";

/// Payment provider double with fixed line items and customer.
#[derive(Debug)]
pub struct FakePaymentProvider {
    items: Vec<PurchasedItem>,
    customer: Customer,
    line_item_calls: AtomicUsize,
}

impl FakePaymentProvider {
    /// A customer linked to [`USER_ID`] buying `items`.
    #[must_use]
    pub fn new(items: Vec<PurchasedItem>) -> Self {
        let metadata = HashMap::from([(USER_ID_KEY.to_owned(), USER_ID.to_owned())]);
        Self {
            items,
            customer: Customer {
                id: CustomerId::new(CUSTOMER_ID),
                email: Some(EMAIL.to_owned()),
                metadata,
            },
            line_item_calls: AtomicUsize::new(0),
        }
    }

    /// Drop the customer's user link.
    #[must_use]
    pub fn without_user(mut self) -> Self {
        self.customer.metadata.clear();
        self
    }

    /// How many times line items were fetched.
    pub fn line_item_calls(&self) -> usize {
        self.line_item_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentProvider for FakePaymentProvider {
    async fn list_line_items(
        &self,
        _session_id: &CheckoutSessionId,
    ) -> Result<Vec<PurchasedItem>, StripeError> {
        self.line_item_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.items.clone())
    }

    async fn retrieve_customer(&self, customer_id: &CustomerId) -> Result<Customer, StripeError> {
        if customer_id == &self.customer.id {
            Ok(self.customer.clone())
        } else {
            Err(StripeError::NotFound(format!("No such customer: {customer_id}")))
        }
    }
}

/// A purchased line for `product_id` with the given unit price in cents.
#[must_use]
pub fn line_item(
    product_id: &str,
    quantity: u64,
    unit_amount: i64,
    selected_options: Option<&str>,
) -> PurchasedItem {
    let mut metadata = HashMap::from([(PRODUCT_ID_KEY.to_owned(), product_id.to_owned())]);
    if let Some(options) = selected_options {
        metadata.insert(SELECTED_OPTIONS_KEY.to_owned(), options.to_owned());
    }
    PurchasedItem {
        quantity: Some(quantity),
        unit_amount: Some(unit_amount),
        amount_total: unit_amount * i64::try_from(quantity).unwrap(),
        metadata,
    }
}

/// Body of a `checkout.session.completed` event.
#[must_use]
pub fn checkout_completed(session_id: &str, amount_total: i64) -> Vec<u8> {
    json!({
        "id": format!("evt_{session_id}"),
        "object": "event",
        "type": "checkout.session.completed",
        "created": 1_700_000_000,
        "data": {
            "object": {
                "id": session_id,
                "object": "checkout.session",
                "customer": CUSTOMER_ID,
                "amount_total": amount_total,
                "currency": "usd"
            }
        }
    })
    .to_string()
    .into_bytes()
}

/// Body of an event of any other type.
#[must_use]
pub fn other_event(event_type: &str) -> Vec<u8> {
    json!({
        "id": "evt_other",
        "type": event_type,
        "data": { "object": { "id": "pi_1" } }
    })
    .to_string()
    .into_bytes()
}

/// Webhook request signed with [`WEBHOOK_SECRET`] at the current time.
#[must_use]
pub fn signed_webhook(body: Vec<u8>) -> Request<Body> {
    let header = signature::sign(&body, WEBHOOK_SECRET, chrono::Utc::now().timestamp());
    webhook_request(body, Some(&header))
}

/// Webhook request with an arbitrary (or no) signature header.
#[must_use]
pub fn webhook_request(body: Vec<u8>, signature_header: Option<&str>) -> Request<Body> {
    let mut builder = Request::post("/checkout/webhook").header("content-type", "application/json");
    if let Some(header) = signature_header {
        builder = builder.header(SIGNATURE_HEADER, header);
    }
    builder.body(Body::from(body)).unwrap()
}

/// Mailer double that keeps every message it is asked to send.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<EmailMessage>>,
}

impl RecordingMailer {
    /// Messages sent so far.
    pub fn sent(&self) -> Vec<EmailMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError> {
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}

/// The whole server wired in-process.
pub struct TestApp {
    pub router: Router,
    pub store: InMemoryOrderStore,
    pub cache: Arc<MokaCacheStore>,
    pub provider: Arc<FakePaymentProvider>,
    pub mailer: Arc<RecordingMailer>,
    /// The bus the webhook publishes on, for publishing events directly.
    pub events: LocalEventBus,
    pub workers: JoinSet<()>,
}

impl TestApp {
    /// Wire the app around a fresh store.
    #[must_use]
    pub fn new(provider: FakePaymentProvider) -> Self {
        Self::with_store(InMemoryOrderStore::new(), provider)
    }

    /// Wire the app around `store`.
    #[must_use]
    pub fn with_store(store: InMemoryOrderStore, provider: FakePaymentProvider) -> Self {
        let cache = Arc::new(MokaCacheStore::new(Duration::from_secs(300)));
        let provider = Arc::new(provider);
        let mailer = Arc::new(RecordingMailer::default());

        let mut registry = EventRegistry::new();
        register_invalidation_workers(&mut registry, Arc::clone(&cache) as Arc<dyn CacheStore>);
        register_email_worker(&mut registry, Arc::clone(&mailer) as Arc<dyn Mailer>);
        let (dispatcher, workers) = EventDispatcher::start(registry);

        let stripe = StripeConfig {
            api_base: "http://127.0.0.1:12111".to_owned(),
            secret_key: SecretString::from("sk_test_unused"),
            webhook_secret: SecretString::from(WEBHOOK_SECRET),
            webhook_tolerance: Duration::from_secs(300),
        };
        let events = LocalEventBus::new(dispatcher);
        let state = AppState::new(
            Arc::new(store.clone()) as Arc<dyn OrderStore>,
            Arc::clone(&provider) as Arc<dyn PaymentProvider>,
            Arc::new(events.clone()),
            Arc::clone(&cache) as Arc<dyn CacheStore>,
            &stripe,
        );

        Self {
            router: apple_store_server::app(state),
            store,
            cache,
            provider,
            mailer,
            events,
            workers,
        }
    }

    /// Send `request` and decode the JSON (or text) body.
    pub async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
            .await
            .unwrap();
        let body = serde_json::from_slice(&bytes)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
        (status, body)
    }

    /// Plain GET.
    pub async fn get(&self, path: &str) -> (StatusCode, Value) {
        self.send(Request::get(path).body(Body::empty()).unwrap())
            .await
    }

    /// GET on behalf of `user_id`.
    pub async fn get_as(&self, user_id: &str, path: &str) -> (StatusCode, Value) {
        self.send(
            Request::get(path)
                .header(USER_ID_HEADER, user_id)
                .body(Body::empty())
                .unwrap(),
        )
        .await
    }
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

//! Stripe wire types.
//!
//! Only the fields order creation reads are modeled; everything else in the
//! payloads is ignored.

use std::collections::HashMap;

use serde::Deserialize;

use apple_store_core::{CheckoutSessionId, CustomerId};

use crate::models::{CheckoutSession, Customer, PurchasedItem};

/// Event type that creates an order.
pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";

/// Webhook event envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct Event {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub created: Option<i64>,
    pub data: EventData,
}

/// The object an event is about.
#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

impl Event {
    /// Whether this event should create an order.
    #[must_use]
    pub fn is_checkout_completed(&self) -> bool {
        self.event_type == CHECKOUT_SESSION_COMPLETED
    }

    /// Decode `data.object` as a checkout session.
    ///
    /// # Errors
    ///
    /// Returns the decode error if the object is not a checkout session.
    pub fn checkout_session(&self) -> Result<CheckoutSession, serde_json::Error> {
        StripeCheckoutSession::deserialize(&self.data.object).map(CheckoutSession::from)
    }
}

/// A field Stripe returns either as an id or, when expanded, as the object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Expandable<T> {
    Id(String),
    Object(Box<T>),
}

/// Minimal object carrying only an id.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectId {
    pub id: String,
}

/// `checkout.session` object.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeCheckoutSession {
    pub id: String,
    #[serde(default)]
    pub customer: Option<Expandable<ObjectId>>,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
}

impl From<StripeCheckoutSession> for CheckoutSession {
    fn from(session: StripeCheckoutSession) -> Self {
        let customer = session.customer.map(|customer| match customer {
            Expandable::Id(id) => CustomerId::new(id),
            Expandable::Object(object) => CustomerId::new(object.id),
        });
        Self {
            id: CheckoutSessionId::new(session.id),
            customer,
            amount_total: session.amount_total,
            currency: session.currency,
        }
    }
}

/// A page of a Stripe list endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct List<T> {
    pub data: Vec<T>,
    #[serde(default)]
    pub has_more: bool,
}

/// `item` object of a checkout session's line items.
#[derive(Debug, Clone, Deserialize)]
pub struct LineItem {
    pub id: String,
    #[serde(default)]
    pub quantity: Option<u64>,
    #[serde(default)]
    pub amount_total: i64,
    #[serde(default)]
    pub price: Option<LineItemPrice>,
}

/// Price attached to a line item.
#[derive(Debug, Clone, Deserialize)]
pub struct LineItemPrice {
    #[serde(default)]
    pub unit_amount: Option<i64>,
    pub product: Expandable<StripeProduct>,
}

/// `product` object (expanded on line items).
#[derive(Debug, Clone, Deserialize)]
pub struct StripeProduct {
    pub id: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl From<LineItem> for PurchasedItem {
    fn from(item: LineItem) -> Self {
        let (unit_amount, metadata) = match item.price {
            Some(price) => {
                let metadata = match price.product {
                    Expandable::Object(product) => product.metadata,
                    Expandable::Id(_) => HashMap::new(),
                };
                (price.unit_amount, metadata)
            }
            None => (None, HashMap::new()),
        };
        Self {
            quantity: item.quantity,
            unit_amount,
            amount_total: item.amount_total,
            metadata,
        }
    }
}

/// `customer` object. Deleted customers come back with only `id` and `deleted`.
#[derive(Debug, Clone, Deserialize)]
pub struct StripeCustomer {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub deleted: bool,
}

impl From<StripeCustomer> for Customer {
    fn from(customer: StripeCustomer) -> Self {
        Self {
            id: CustomerId::new(customer.id),
            email: customer.email.filter(|e| !e.trim().is_empty()),
            metadata: customer.metadata,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::models::checkout::{PRODUCT_ID_KEY, SELECTED_OPTIONS_KEY};

    #[test]
    fn test_event_checkout_session() {
        let event: Event = serde_json::from_value(json!({
            "id": "evt_1",
            "type": "checkout.session.completed",
            "created": 1_700_000_000,
            "data": {
                "object": {
                    "id": "cs_test_1",
                    "object": "checkout.session",
                    "customer": "cus_1",
                    "amount_total": 3500,
                    "currency": "usd",
                    "payment_status": "paid"
                }
            }
        }))
        .unwrap();

        assert!(event.is_checkout_completed());
        let session = event.checkout_session().unwrap();
        assert_eq!(session.id, CheckoutSessionId::new("cs_test_1"));
        assert_eq!(session.customer, Some(CustomerId::new("cus_1")));
        assert_eq!(session.amount_total, Some(3500));
    }

    #[test]
    fn test_session_without_customer() {
        let session: StripeCheckoutSession =
            serde_json::from_value(json!({"id": "cs_1", "customer": null})).unwrap();
        assert_eq!(CheckoutSession::from(session).customer, None);
    }

    #[test]
    fn test_line_item_with_expanded_product() {
        let page: List<LineItem> = serde_json::from_value(json!({
            "object": "list",
            "has_more": false,
            "data": [{
                "id": "li_1",
                "quantity": 2,
                "amount_total": 2500,
                "price": {
                    "unit_amount": 1250,
                    "product": {
                        "id": "prod_1",
                        "metadata": {
                            "productId": "p1",
                            "selectedOptions": "[\"blue\",\"256gb\"]"
                        }
                    }
                }
            }]
        }))
        .unwrap();

        let item = PurchasedItem::from(page.data.into_iter().next().unwrap());
        assert_eq!(item.quantity, Some(2));
        assert_eq!(item.unit_amount, Some(1250));
        assert_eq!(item.amount_total, 2500);
        assert_eq!(item.metadata_value(PRODUCT_ID_KEY), Some("p1"));
        assert_eq!(
            item.metadata_value(SELECTED_OPTIONS_KEY),
            Some("[\"blue\",\"256gb\"]")
        );
    }

    #[test]
    fn test_line_item_with_unexpanded_product_has_no_metadata() {
        let item: LineItem = serde_json::from_value(json!({
            "id": "li_1",
            "quantity": 1,
            "amount_total": 100,
            "price": {"unit_amount": 100, "product": "prod_1"}
        }))
        .unwrap();

        assert!(PurchasedItem::from(item).metadata.is_empty());
    }

    #[test]
    fn test_deleted_customer() {
        let customer: StripeCustomer =
            serde_json::from_value(json!({"id": "cus_1", "object": "customer", "deleted": true}))
                .unwrap();
        assert!(customer.deleted);

        let customer = Customer::from(customer);
        assert_eq!(customer.user_id(), None);
        assert_eq!(customer.email, None);
    }
}

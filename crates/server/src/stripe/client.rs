//! Stripe REST client.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, instrument};
use url::Url;

use apple_store_core::{CheckoutSessionId, CustomerId};

use super::types::{LineItem, List, StripeCustomer};
use super::{PaymentProvider, StripeError};
use crate::config::StripeConfig;
use crate::models::{Customer, PurchasedItem};

/// Largest page Stripe serves.
const PAGE_LIMIT: &str = "100";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Stripe API client.
#[derive(Clone)]
pub struct StripeClient {
    inner: Arc<StripeClientInner>,
}

struct StripeClientInner {
    client: reqwest::Client,
    api_base: Url,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: Option<String>,
}

impl StripeClient {
    /// Create a new Stripe API client.
    ///
    /// # Errors
    ///
    /// Returns error if the base URL is invalid or the HTTP client fails to build.
    pub fn new(config: &StripeConfig) -> Result<Self, StripeError> {
        let api_base = Url::parse(&config.api_base)
            .map_err(|e| StripeError::Config(format!("invalid API base URL: {e}")))?;
        if api_base.cannot_be_a_base() {
            return Err(StripeError::Config(format!(
                "API base URL cannot be a base: {api_base}"
            )));
        }

        let mut auth_value =
            HeaderValue::from_str(&format!("Bearer {}", config.secret_key.expose_secret()))
                .map_err(|e| StripeError::Config(format!("Invalid API key format: {e}")))?;
        auth_value.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth_value);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            inner: Arc::new(StripeClientInner { client, api_base }),
        })
    }

    /// Build an endpoint URL from path segments (each percent-encoded).
    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.inner.api_base.clone();
        // Checked in `new`
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    async fn get<T: DeserializeOwned>(&self, url: Url) -> Result<T, StripeError> {
        debug!(path = url.path(), "Stripe GET");
        let response = self.inner.client.get(url).send().await?;
        Self::handle_response(response).await
    }

    /// Handle API response and parse JSON.
    async fn handle_response<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, StripeError> {
        if response.status().is_success() {
            return response
                .json()
                .await
                .map_err(|e| StripeError::Parse(format!("Failed to parse response: {e}")));
        }

        Err(Self::parse_error(response).await)
    }

    /// Parse error response from the Stripe API.
    async fn parse_error(response: reqwest::Response) -> StripeError {
        let status = response.status().as_u16();

        if status == 429 {
            let retry_after = response
                .headers()
                .get("Retry-After")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(1);
            return StripeError::RateLimited(retry_after);
        }

        if status == 401 || status == 403 {
            return StripeError::Unauthorized;
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorEnvelope>(&body)
            .ok()
            .and_then(|e| e.error.message)
            .unwrap_or(body);

        if status == 404 {
            return StripeError::NotFound(message);
        }

        StripeError::Api { status, message }
    }
}

#[async_trait]
impl PaymentProvider for StripeClient {
    #[instrument(skip(self), fields(session_id = %session_id))]
    async fn list_line_items(
        &self,
        session_id: &CheckoutSessionId,
    ) -> Result<Vec<PurchasedItem>, StripeError> {
        let mut items = Vec::new();
        let mut starting_after: Option<String> = None;

        loop {
            let mut url = self.endpoint(&[
                "v1",
                "checkout",
                "sessions",
                session_id.as_str(),
                "line_items",
            ]);
            {
                let mut query = url.query_pairs_mut();
                query
                    .append_pair("expand[]", "data.price.product")
                    .append_pair("limit", PAGE_LIMIT);
                if let Some(cursor) = &starting_after {
                    query.append_pair("starting_after", cursor);
                }
            }

            let page: List<LineItem> = self.get(url).await?;
            let has_more = page.has_more;
            starting_after = page.data.last().map(|item| item.id.clone());
            items.extend(page.data.into_iter().map(PurchasedItem::from));

            if !has_more || starting_after.is_none() {
                break;
            }
        }

        debug!(count = items.len(), "Fetched line items");
        Ok(items)
    }

    #[instrument(skip(self), fields(customer_id = %customer_id))]
    async fn retrieve_customer(&self, customer_id: &CustomerId) -> Result<Customer, StripeError> {
        let url = self.endpoint(&["v1", "customers", customer_id.as_str()]);
        let customer: StripeCustomer = self.get(url).await?;
        if customer.deleted {
            debug!("Customer has been deleted");
        }
        Ok(customer.into())
    }
}

impl std::fmt::Debug for StripeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeClient")
            .field("api_base", &self.inner.api_base.as_str())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use secrecy::SecretString;

    use super::*;

    fn config(api_base: &str) -> StripeConfig {
        StripeConfig {
            api_base: api_base.to_string(),
            secret_key: SecretString::from("sk_test_aB3xY9mK2nL5pQ7rT0uW4zC6"),
            webhook_secret: SecretString::from("whsec_aB3xY9mK2nL5pQ7rT0uW4zC6"),
            webhook_tolerance: Duration::from_secs(300),
        }
    }

    #[test]
    fn test_endpoint_joins_segments() {
        let client = StripeClient::new(&config("https://api.stripe.com")).unwrap();
        let url = client.endpoint(&["v1", "customers", "cus_123"]);
        assert_eq!(url.as_str(), "https://api.stripe.com/v1/customers/cus_123");
    }

    #[test]
    fn test_endpoint_keeps_base_path_and_escapes() {
        let client = StripeClient::new(&config("http://localhost:12111/stripe/")).unwrap();
        let url = client.endpoint(&["v1", "customers", "cus/../x"]);
        assert_eq!(
            url.as_str(),
            "http://localhost:12111/stripe/v1/customers/cus%2F..%2Fx"
        );
    }

    #[test]
    fn test_invalid_base_rejected() {
        assert!(matches!(
            StripeClient::new(&config("not a url")),
            Err(StripeError::Config(_))
        ));
        assert!(matches!(
            StripeClient::new(&config("mailto:ops@example.com")),
            Err(StripeError::Config(_))
        ));
    }

    #[test]
    fn test_debug_hides_key() {
        let client = StripeClient::new(&config("https://api.stripe.com")).unwrap();
        let debug = format!("{client:?}");
        assert!(debug.contains("api.stripe.com"));
        assert!(!debug.contains("sk_test"));
    }
}

//! Manual event publishing.
//!
//! Lets an operator force cache invalidation on every server instance, for
//! example after editing products directly in the database.
//!
//! # Environment Variables
//!
//! - `REDIS_URL` - Redis instance the servers subscribe to

use apple_store_core::{Channel, UnknownChannel};
use apple_store_server::events::{EventError, EventPublisher, RedisEventBus};
use secrecy::SecretString;
use thiserror::Error;

use super::env_var;

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error(transparent)]
    Channel(#[from] UnknownChannel),

    #[error("Payload is not a JSON object: {0}")]
    Payload(String),

    #[error("Publish failed: {0}")]
    Event(#[from] EventError),
}

/// Validate a channel name and payload before anything touches Redis.
fn prepare(channel: &str, payload: &str) -> Result<(Channel, String), PublishError> {
    let channel: Channel = channel.trim().parse()?;
    let value: serde_json::Value =
        serde_json::from_str(payload).map_err(|e| PublishError::Payload(e.to_string()))?;
    if !value.is_object() {
        return Err(PublishError::Payload(format!("got {value}")));
    }
    // Re-serialize to strip whitespace the shell may have carried in
    Ok((channel, value.to_string()))
}

/// Publish `payload` on `channel`.
///
/// # Errors
///
/// Returns `PublishError` if the channel is unknown, the payload is not a
/// JSON object, `REDIS_URL` is unset, or Redis rejects the publish.
pub async fn run(channel: &str, payload: &str) -> Result<(), PublishError> {
    let (channel, payload) = prepare(channel, payload)?;
    let redis_url = env_var("REDIS_URL")
        .map(SecretString::from)
        .ok_or(PublishError::MissingEnvVar("REDIS_URL"))?;

    let bus = RedisEventBus::connect(&redis_url).await?;
    bus.publish(channel, payload).await?;

    tracing::info!(channel = %channel, "Event published");
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_known_channel() {
        let (channel, payload) =
            prepare(" user-order-modified ", "{ \"userId\": \"u_1\" }").unwrap();
        assert_eq!(channel, Channel::UserOrderModified);
        assert_eq!(payload, r#"{"userId":"u_1"}"#);
    }

    #[test]
    fn test_prepare_unknown_channel() {
        assert!(matches!(
            prepare("order-shipped", "{}"),
            Err(PublishError::Channel(UnknownChannel(name))) if name == "order-shipped"
        ));
    }

    #[test]
    fn test_prepare_rejects_non_object() {
        assert!(matches!(
            prepare("product-created", "not json"),
            Err(PublishError::Payload(_))
        ));
        assert!(matches!(
            prepare("product-created", "[1,2]"),
            Err(PublishError::Payload(_))
        ));
    }
}

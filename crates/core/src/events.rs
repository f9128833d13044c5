//! Domain event channels and payloads.
//!
//! Events are fire-and-forget notifications announcing that persisted state
//! changed somewhere. They carry just enough to derive which cached query
//! results went stale. Payloads are JSON with camelCase field names, matching
//! what the other services publish.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ProductId, UserId};

/// Error returned when a channel name is not one of the known channels.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown event channel: {0}")]
pub struct UnknownChannel(pub String);

/// Known pub/sub channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Channel {
    ProductModified,
    ProductCreated,
    ProductDeleted,
    FeaturedProductModified,
    UserModified,
    UserDeleted,
    UserOrderModified,
    SendEmail,
}

impl Channel {
    /// Every known channel.
    pub const ALL: [Self; 8] = [
        Self::ProductModified,
        Self::ProductCreated,
        Self::ProductDeleted,
        Self::FeaturedProductModified,
        Self::UserModified,
        Self::UserDeleted,
        Self::UserOrderModified,
        Self::SendEmail,
    ];

    /// Wire name of the channel.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ProductModified => "product-modified",
            Self::ProductCreated => "product-created",
            Self::ProductDeleted => "product-deleted",
            Self::FeaturedProductModified => "featured-product-modified",
            Self::UserModified => "user-modified",
            Self::UserDeleted => "user-deleted",
            Self::UserOrderModified => "user-order-modified",
            Self::SendEmail => "send-email",
        }
    }
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Channel {
    type Err = UnknownChannel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|channel| channel.as_str() == s)
            .ok_or_else(|| UnknownChannel(s.to_owned()))
    }
}

/// Payload of `user-order-modified`.
///
/// Two independent workers consume this channel: one needs `userId`, the
/// other needs `email`. Publishers include whichever they know.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOrderModified {
    pub user_id: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Payload of `product-modified`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductModified {
    pub product_id: ProductId,
    pub slug: String,
}

/// Payload of `user-modified`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserModified {
    pub user_id: UserId,
    #[serde(default)]
    pub is_from_admin_edit: bool,
}

/// Payload of `send-email`.
///
/// `html`, when present, is sent as an alternative to the plain-text body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailMessage {
    pub to: String,
    pub subject: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html: Option<String>,
}

/// Payload consumed by the customer-analytics worker.
///
/// Published on `user-order-modified`; messages without an email are not
/// addressed to this worker.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CustomerEmail {
    pub email: String,
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_names_roundtrip() {
        for channel in Channel::ALL {
            assert_eq!(channel.as_str().parse::<Channel>().unwrap(), channel);
        }
    }

    #[test]
    fn test_unknown_channel() {
        let err = "order-created".parse::<Channel>().unwrap_err();
        assert_eq!(err, UnknownChannel("order-created".to_string()));
    }

    #[test]
    fn test_user_order_modified_wire_format() {
        let payload = UserOrderModified {
            user_id: UserId::new("u1"),
            email: None,
        };
        assert_eq!(
            serde_json::to_string(&payload).unwrap(),
            r#"{"userId":"u1"}"#
        );

        let with_email: UserOrderModified =
            serde_json::from_str(r#"{"userId":"u1","email":"a@b.co"}"#).unwrap();
        assert_eq!(with_email.email.as_deref(), Some("a@b.co"));
    }

    #[test]
    fn test_customer_email_requires_email() {
        assert!(serde_json::from_str::<CustomerEmail>(r#"{"userId":"u1"}"#).is_err());
        let parsed: CustomerEmail =
            serde_json::from_str(r#"{"userId":"u1","email":"a@b.co"}"#).unwrap();
        assert_eq!(parsed.email, "a@b.co");
    }

    #[test]
    fn test_email_message_html_optional() {
        let parsed: EmailMessage =
            serde_json::from_str(r#"{"to":"a@b.co","subject":"Hi","text":"Hello"}"#).unwrap();
        assert_eq!(parsed.html, None);
        assert!(serde_json::from_str::<EmailMessage>(r#"{"to":"a@b.co"}"#).is_err());
    }

    #[test]
    fn test_user_modified_admin_flag_defaults_false() {
        let parsed: UserModified = serde_json::from_str(r#"{"userId":"u9"}"#).unwrap();
        assert!(!parsed.is_from_admin_edit);
    }
}

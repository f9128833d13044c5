//! Webhook signature verification.
//!
//! Stripe signs each delivery with the endpoint secret:
//! <https://docs.stripe.com/webhooks#verify-manually>
//!
//! ```text
//! Stripe-Signature: t=1700000000,v1=5257a869...,v1=...
//! signed payload:   "<t>.<raw request body>"
//! signature:        hex(HMAC-SHA256(secret, signed payload))
//! ```
//!
//! Several `v1` entries appear while a secret is being rolled; any match is
//! accepted. Other schemes (`v0`) are ignored.

use std::time::Duration;

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

/// Header carrying the webhook signature.
pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

const SCHEME: &str = "v1";

/// Why a delivery was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    #[error("missing {SIGNATURE_HEADER} header")]
    MissingHeader,

    #[error("malformed signature header: {0}")]
    Malformed(&'static str),

    #[error("timestamp outside the tolerance zone")]
    TimestampOutsideTolerance,

    #[error("no signature matches the payload")]
    Mismatch,
}

/// Verify a webhook delivery.
///
/// # Arguments
///
/// * `payload` - The raw request body, exactly as received
/// * `header` - The `Stripe-Signature` header value
/// * `secret` - The endpoint signing secret
/// * `tolerance` - Maximum age of the signature timestamp
/// * `now` - Current unix time in seconds
///
/// # Errors
///
/// Returns `SignatureError` if the header cannot be parsed, the timestamp is
/// too old, or no `v1` signature matches.
pub fn verify(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance: Duration,
    now: i64,
) -> Result<(), SignatureError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => {
                timestamp = Some(
                    value
                        .parse::<i64>()
                        .map_err(|_| SignatureError::Malformed("timestamp is not an integer"))?,
                );
            }
            SCHEME => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(SignatureError::Malformed("no timestamp"))?;
    if signatures.is_empty() {
        return Err(SignatureError::Malformed("no v1 signature"));
    }

    let max_age = i64::try_from(tolerance.as_secs()).unwrap_or(i64::MAX);
    if now.saturating_sub(timestamp) > max_age {
        return Err(SignatureError::TimestampOutsideTolerance);
    }

    let expected = compute_signature(payload, secret, timestamp);
    if signatures
        .iter()
        .any(|candidate| constant_time_compare(&expected, candidate))
    {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Build a `Stripe-Signature` header value for `payload`.
///
/// Used by the CLI and tests to produce deliveries the server accepts.
#[must_use]
pub fn sign(payload: &[u8], secret: &str, timestamp: i64) -> String {
    format!(
        "t={timestamp},{SCHEME}={}",
        compute_signature(payload, secret, timestamp)
    )
}

fn compute_signature(payload: &[u8], secret: &str, timestamp: i64) -> String {
    // HMAC accepts keys of any length
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return String::new();
    };
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }

    result == 0
}

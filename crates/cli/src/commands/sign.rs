//! Webhook signing for local testing.
//!
//! ```bash
//! as-cli sign-webhook event.json > sig.txt
//! curl -X POST localhost:5000/checkout/webhook \
//!   -H "Stripe-Signature: $(cat sig.txt)" --data-binary @event.json
//! ```
//!
//! # Environment Variables
//!
//! - `STRIPE_WEBHOOK_SECRET` - Signing secret the server verifies against

use std::io::Write;
use std::path::Path;

use apple_store_server::stripe::signature;
use thiserror::Error;

use super::env_var;

#[derive(Debug, Error)]
pub enum SignError {
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Print the signature header for the payload in `file`.
///
/// # Errors
///
/// Returns `SignError` if the file cannot be read, stdout cannot be written,
/// or `STRIPE_WEBHOOK_SECRET` is unset.
pub fn run(file: &Path, timestamp: Option<i64>) -> Result<(), SignError> {
    let secret = env_var("STRIPE_WEBHOOK_SECRET")
        .ok_or(SignError::MissingEnvVar("STRIPE_WEBHOOK_SECRET"))?;
    let payload = std::fs::read(file)?;
    let timestamp = timestamp.unwrap_or_else(|| chrono::Utc::now().timestamp());

    let header = signature::sign(&payload, &secret, timestamp);
    writeln!(std::io::stdout().lock(), "{header}")?;
    Ok(())
}

//! Transactional email for `send-email` events.
//!
//! Other services publish a fully rendered [`EmailMessage`]; this worker only
//! delivers it over SMTP. Delivery is best-effort like every event worker:
//! failures are logged and the event is dropped.

use std::sync::Arc;

use async_trait::async_trait;
use lettre::{
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
    message::{Mailbox, MultiPart, SinglePart, header::ContentType},
    transport::smtp::{Error as SmtpError, authentication::Credentials},
};
use secrecy::ExposeSecret;
use thiserror::Error;
use tracing::{debug, info, warn};

use apple_store_core::Channel;
use apple_store_core::events::EmailMessage;

use crate::config::EmailConfig;
use crate::events::EventRegistry;

/// Errors that can occur when sending email.
#[derive(Debug, Error)]
pub enum EmailError {
    /// SMTP transport error.
    #[error("SMTP error: {0}")]
    Smtp(#[from] SmtpError),

    /// Failed to build email message.
    #[error("Failed to build message: {0}")]
    MessageBuild(#[from] lettre::error::Error),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),
}

/// Sends rendered emails.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError>;
}

/// [`Mailer`] that relays through an SMTP server with STARTTLS.
#[derive(Clone)]
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    /// Create a mailer from configuration.
    ///
    /// # Errors
    ///
    /// Returns error if the sender address is invalid or the relay cannot be
    /// configured.
    pub fn new(config: &EmailConfig) -> Result<Self, EmailError> {
        let from = parse_mailbox(&config.from_address)?;
        let credentials = Credentials::new(
            config.smtp_username.clone(),
            config.smtp_password.expose_secret().to_string(),
        );

        let transport = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)?
            .port(config.smtp_port)
            .credentials(credentials)
            .build();

        Ok(Self { transport, from })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, message: &EmailMessage) -> Result<(), EmailError> {
        let email = build_message(&self.from, message)?;
        self.transport.send(email).await?;
        Ok(())
    }
}

fn parse_mailbox(address: &str) -> Result<Mailbox, EmailError> {
    address
        .parse()
        .map_err(|_| EmailError::InvalidAddress(address.to_string()))
}

/// Build the MIME message for `message`.
///
/// Plain text only, or `multipart/alternative` when an HTML body is given.
///
/// # Errors
///
/// Returns `InvalidAddress` for an unparseable recipient.
pub fn build_message(from: &Mailbox, message: &EmailMessage) -> Result<Message, EmailError> {
    let builder = Message::builder()
        .from(from.clone())
        .to(parse_mailbox(&message.to)?)
        .subject(message.subject.as_str());

    let text = SinglePart::builder()
        .header(ContentType::TEXT_PLAIN)
        .body(message.text.clone());

    let email = match &message.html {
        Some(html) => builder.multipart(
            MultiPart::alternative().singlepart(text).singlepart(
                SinglePart::builder()
                    .header(ContentType::TEXT_HTML)
                    .body(html.clone()),
            ),
        )?,
        None => builder.singlepart(text)?,
    };
    Ok(email)
}

/// Deliver one email, logging the outcome.
pub async fn deliver_email(mailer: &dyn Mailer, message: &EmailMessage) {
    match mailer.send(message).await {
        Ok(()) => info!(to = %message.to, subject = %message.subject, "Email sent"),
        Err(e) => warn!(to = %message.to, error = %e, "Failed to send email"),
    }
}

/// Install the `send-email` worker in `registry`.
pub fn register_email_worker(registry: &mut EventRegistry, mailer: Arc<dyn Mailer>) {
    registry.on(Channel::SendEmail, move |payload| {
        let mailer = Arc::clone(&mailer);
        async move {
            match serde_json::from_str::<EmailMessage>(&payload) {
                Ok(message) => deliver_email(mailer.as_ref(), &message).await,
                Err(e) => debug!(error = %e, "Dropping malformed send-email payload"),
            }
        }
    });
}

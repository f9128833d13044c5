//! Unified error handling for the server.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::services::{HistoryError, WebhookError};

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Webhook delivery could not be processed.
    #[error("Webhook error: {0}")]
    Webhook(#[from] WebhookError),

    /// Order history could not be read.
    #[error("Order history error: {0}")]
    History(#[from] HistoryError),

    /// The request carried no user identity.
    #[error("Unauthorized: {0}")]
    Unauthorized(&'static str),

    /// The requested resource does not exist for this caller.
    #[error("Not found")]
    NotFound,
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            Self::Webhook(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            Self::History(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Webhook(_) | Self::History(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Log server errors with Sentry
        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        } else {
            tracing::warn!(error = %self, "Rejected request");
        }

        // Don't expose internal error details to clients
        let message = match &self {
            Self::Webhook(e) if e.is_client_error() => self.to_string(),
            Self::Webhook(_) => "Failed to process order.".to_string(),
            Self::History(e) if e.is_client_error() => self.to_string(),
            Self::History(_) => "Internal server error".to_string(),
            Self::Unauthorized(_) | Self::NotFound => self.to_string(),
        };

        (status, message).into_response()
    }
}

#[cfg(test)]
mod tests {
    use apple_store_core::CheckoutSessionId;

    use super::*;
    use crate::db::RepositoryError;
    use crate::stripe::SignatureError;

    fn get_status(err: AppError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn test_app_error_display() {
        let err = AppError::from(HistoryError::InvalidLimit(500));
        assert_eq!(
            err.to_string(),
            "Order history error: limit must be between 1 and 100, got 500"
        );
    }

    #[test]
    fn test_webhook_status_codes() {
        assert_eq!(
            get_status(WebhookError::Signature(SignatureError::Mismatch).into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            get_status(
                WebhookError::MissingUserReference(CheckoutSessionId::new("cs_1")).into()
            ),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_history_status_codes() {
        assert_eq!(
            get_status(HistoryError::InvalidPage.into()),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            get_status(HistoryError::Repository(RepositoryError::NotFound).into()),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            get_status(AppError::Unauthorized("missing user")),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(get_status(AppError::NotFound), StatusCode::NOT_FOUND);
    }
}

//! Mapping of domain errors onto HTTP responses.
//!
//! Every non-2xx response carries an [`ApiErrorBody`] whose `retrySafe` comes
//! straight from the domain error's `retry_safety()`.

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use leadpay_core::ledger::LedgerError;
use leadpay_core::pricing::PricingError;
use leadpay_core::processors::SchedulerError;
use leadpay_core::purchase::PurchaseError;
use leadpay_core::store::StoreError;
use leadpay_core::vault::VaultError;
use leadpay_sdk::objects::{ApiErrorBody, RetrySafety};
use uuid::Uuid;

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ApiErrorBody,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        code: &str,
        message: impl Into<String>,
        retry_safe: RetrySafety,
    ) -> Self {
        Self {
            status,
            body: ApiErrorBody {
                error: code.to_owned(),
                message: message.into(),
                retry_safe,
                existing_purchase_id: None,
            },
        }
    }

    pub fn bad_request(code: &str, message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::BAD_REQUEST,
            code,
            message,
            RetrySafety::AfterCorrection,
        )
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            message,
            RetrySafety::Never,
        )
    }

    /// A failure the caller can do nothing about. The cause is logged and
    /// not echoed back.
    pub fn internal(cause: &dyn std::fmt::Display, retry_safe: RetrySafety) -> Self {
        tracing::error!(error = %cause, "Request failed with an internal error");
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "internal server error",
            retry_safe,
        )
    }

    pub fn with_existing(mut self, existing: Uuid) -> Self {
        self.body.existing_purchase_id = Some(existing);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::bad_request("invalid_request", rejection.body_text())
    }
}

impl From<PricingError> for ApiError {
    fn from(e: PricingError) -> Self {
        let retry = e.retry_safety();
        let code = match &e {
            PricingError::UnknownBand { .. } => "unknown_band",
            PricingError::MalformedBandId(_) => "malformed_band_id",
            PricingError::QuoteExpired { .. } => "quote_expired",
            PricingError::StaleQuote => "stale_quote",
            PricingError::DuplicateBand(_)
            | PricingError::NonPositiveBasePrice { .. }
            | PricingError::Overflow => return ApiError::internal(&e, retry),
        };
        ApiError::new(StatusCode::BAD_REQUEST, code, e.to_string(), retry)
    }
}

impl From<VaultError> for ApiError {
    fn from(e: VaultError) -> Self {
        let (status, code) = match &e {
            VaultError::UnknownPaymentMethod(_) => {
                (StatusCode::BAD_REQUEST, "unknown_payment_method")
            }
            VaultError::NetworkTimeout => (StatusCode::GATEWAY_TIMEOUT, "gateway_timeout"),
            VaultError::Unavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "gateway_unavailable"),
        };
        ApiError::new(status, code, e.to_string(), e.retry_safety())
    }
}

fn from_store(e: StoreError, retry: RetrySafety) -> ApiError {
    ApiError::internal(&e, retry)
}

impl From<LedgerError> for ApiError {
    fn from(e: LedgerError) -> Self {
        let retry = e.retry_safety();
        let message = e.to_string();
        match e {
            LedgerError::InvalidAmount(_) => {
                ApiError::new(StatusCode::BAD_REQUEST, "invalid_amount", message, retry)
            }
            LedgerError::InsufficientBalance { .. } => ApiError::new(
                StatusCode::PAYMENT_REQUIRED,
                "insufficient_balance",
                message,
                retry,
            ),
            LedgerError::Store(inner) => from_store(inner, retry),
        }
    }
}

impl From<PurchaseError> for ApiError {
    fn from(e: PurchaseError) -> Self {
        let retry = e.retry_safety();
        let message = e.to_string();
        match e {
            PurchaseError::InvalidAmount(_) => {
                ApiError::new(StatusCode::BAD_REQUEST, "invalid_amount", message, retry)
            }
            PurchaseError::InvalidTransition { .. } => {
                ApiError::new(StatusCode::BAD_REQUEST, "invalid_transition", message, retry)
            }
            PurchaseError::PurchaseNotFound(_) => {
                ApiError::new(StatusCode::NOT_FOUND, "purchase_not_found", message, retry)
            }
            PurchaseError::DuplicateActivePurchase { existing } => ApiError::new(
                StatusCode::CONFLICT,
                "duplicate_active_purchase",
                message,
                retry,
            )
            .with_existing(existing),
            PurchaseError::ConcurrentModification(_) => {
                ApiError::new(StatusCode::CONFLICT, "concurrent_modification", message, retry)
            }
            PurchaseError::ChargeInProgress(_) => {
                ApiError::new(StatusCode::CONFLICT, "charge_in_progress", message, retry)
            }
            PurchaseError::ConfirmationPending(_) => {
                ApiError::new(StatusCode::CONFLICT, "confirmation_pending", message, retry)
            }
            PurchaseError::InsufficientBalance { .. } => ApiError::new(
                StatusCode::PAYMENT_REQUIRED,
                "insufficient_balance",
                message,
                retry,
            ),
            PurchaseError::Declined { .. } => {
                ApiError::new(StatusCode::PAYMENT_REQUIRED, "payment_declined", message, retry)
            }
            PurchaseError::AttemptsExhausted { .. } => ApiError::new(
                StatusCode::PAYMENT_REQUIRED,
                "attempts_exhausted",
                message,
                retry,
            ),
            PurchaseError::Vault(inner) => inner.into(),
            PurchaseError::Store(inner) => from_store(inner, retry),
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(e: SchedulerError) -> Self {
        let retry = e.retry_safety();
        match e {
            SchedulerError::Store(inner) => from_store(inner, retry),
            SchedulerError::PurchaseNotFound(_) => ApiError::new(
                StatusCode::NOT_FOUND,
                "purchase_not_found",
                e.to_string(),
                retry,
            ),
            SchedulerError::ConsistencyViolation { .. } => ApiError::internal(&e, retry),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duplicate_carries_existing_purchase() {
        let existing = Uuid::now_v7();
        let err = ApiError::from(PurchaseError::DuplicateActivePurchase { existing });
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.body.existing_purchase_id, Some(existing));
        assert_eq!(err.body.retry_safe, RetrySafety::Never);
    }

    #[test]
    fn test_gateway_errors_map_to_5xx() {
        let timeout = ApiError::from(PurchaseError::Vault(VaultError::NetworkTimeout));
        assert_eq!(timeout.status(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(timeout.body.retry_safe, RetrySafety::Safe);

        let down = ApiError::from(VaultError::Unavailable("503".into()));
        assert_eq!(down.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_declines_are_payment_required() {
        let err = ApiError::from(PurchaseError::Declined {
            reason: "insufficient_funds".into(),
            attempts_left: 2,
        });
        assert_eq!(err.status(), StatusCode::PAYMENT_REQUIRED);
        assert_eq!(err.body.error, "payment_declined");
        assert_eq!(err.body.retry_safe, RetrySafety::AfterCorrection);
    }

    #[test]
    fn test_stale_quote_is_input_error() {
        let err = ApiError::from(PricingError::StaleQuote);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.body.error, "stale_quote");
    }
}

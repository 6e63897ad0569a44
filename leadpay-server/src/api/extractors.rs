//! Custom Axum extractors.
//!
//! Provides:
//! - `ApiJson<T>`: `Json<T>` whose rejection is an [`ApiError`] body instead
//!   of plain text.
//! - `GatewaySignedBody<T>`: verifies the `Leadpay-Gateway-Signature` header
//!   against the raw webhook body (used by `POST /gateway/webhook`).
//!
//! All cryptographic operations are delegated to [`leadpay_sdk::signature`].

use axum::extract::{FromRequest, Request};
use leadpay_sdk::signature::{GATEWAY_SIGNATURE_HEADER, Signature, SignatureError, SignedObject};

use crate::api::error::ApiError;
use crate::state::AppState;

const MAX_WEBHOOK_BODY: usize = 1024 * 1024;

#[derive(Debug, FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
pub struct ApiJson<T>(pub T);

/// An Axum extractor that verifies the `Leadpay-Gateway-Signature` header and
/// deserializes + authenticates the JSON request body.
///
/// # Header format
///
/// ```text
/// Leadpay-Gateway-Signature: {unix_timestamp}.{base64_signature}
/// ```
///
/// The signature is `HMAC-SHA256("{timestamp}.{json_body}", webhook_secret)`.
pub struct GatewaySignedBody<T: Signature>(pub T);

/// Errors that can occur during signed-body verification.
#[derive(Debug, thiserror::Error)]
pub enum SignedBodyError {
    #[error("missing Leadpay-Gateway-Signature header")]
    MissingHeader,
    #[error("invalid Leadpay-Gateway-Signature header format")]
    InvalidHeader,
    #[error("invalid signature encoding")]
    InvalidBase64,
    #[error("failed to read request body")]
    BodyReadError,
    #[error("invalid JSON body: {0}")]
    JsonError(serde_json::Error),
    #[error("signature verification failed")]
    VerificationFailed,
}

impl From<SignatureError> for SignedBodyError {
    fn from(err: SignatureError) -> Self {
        match err {
            SignatureError::InvalidFormat => Self::InvalidHeader,
            SignatureError::InvalidBase64 => Self::InvalidBase64,
            SignatureError::Json(e) => Self::JsonError(e),
            SignatureError::SignatureMismatch | SignatureError::Expired => Self::VerificationFailed,
        }
    }
}

impl From<SignedBodyError> for ApiError {
    fn from(err: SignedBodyError) -> Self {
        match err {
            SignedBodyError::MissingHeader | SignedBodyError::VerificationFailed => {
                ApiError::unauthorized(err.to_string())
            }
            SignedBodyError::InvalidHeader
            | SignedBodyError::InvalidBase64
            | SignedBodyError::BodyReadError
            | SignedBodyError::JsonError(_) => {
                ApiError::bad_request("invalid_request", err.to_string())
            }
        }
    }
}

impl<T: Signature + Send> FromRequest<AppState> for GatewaySignedBody<T> {
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let header_value = req
            .headers()
            .get(GATEWAY_SIGNATURE_HEADER)
            .ok_or(SignedBodyError::MissingHeader)?
            .to_str()
            .map_err(|_| SignedBodyError::InvalidHeader)?
            .to_owned();

        let body_bytes = axum::body::to_bytes(req.into_body(), MAX_WEBHOOK_BODY)
            .await
            .map_err(|_| SignedBodyError::BodyReadError)?;

        let json =
            String::from_utf8(body_bytes.to_vec()).map_err(|_| SignedBodyError::BodyReadError)?;

        let signed = SignedObject::<T>::from_header_and_body(&header_value, json)
            .map_err(SignedBodyError::from)?;

        let gateway = state.config.gateway.read().await;
        let verified_body = signed
            .verify(gateway.webhook_secret_bytes())
            .map_err(SignedBodyError::from)?;
        drop(gateway);

        Ok(GatewaySignedBody(verified_body))
    }
}

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use leadpay_core::entities::{Purchase, PurchaseStatus};
use leadpay_core::purchase::{ConfirmationResult, PaymentChoice};
use leadpay_sdk::objects::{
    ConfirmPurchaseRequest, CreatePaymentIntentRequest, CreatePaymentIntentResponse,
    CustomerResponseAck, PurchaseResponse, SelectPaymentMethodRequest,
};
use time::OffsetDateTime;
use uuid::Uuid;

use super::to_response;
use crate::api::error::ApiError;
use crate::api::extractors::ApiJson;
use crate::state::AppState;

/// `POST /create-payment-intent`: open a purchase for a quoted lead.
///
/// The quote is checked against the live catalog first. The balance is
/// drawn on immediately; when it does not cover the price and the request
/// names a payment method, the remainder is charged in the same call. If
/// that charge fails the error carries the purchase id so the client can
/// continue with `/purchases/{purchase_id}/payment-method`.
pub(super) async fn create_payment_intent(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<CreatePaymentIntentRequest>,
) -> Result<(StatusCode, Json<CreatePaymentIntentResponse>), ApiError> {
    let expires_at = OffsetDateTime::from_unix_timestamp(request.expires_at)
        .map_err(|_| ApiError::bad_request("invalid_request", "expiresAt is out of range"))?;
    let breakdown = state
        .pricing
        .revalidate(&request.breakdown, expires_at, OffsetDateTime::now_utc())
        .await?;

    let purchase = state
        .orchestrator
        .begin(request.job_id, request.pro_id, breakdown)
        .await?;

    let (purchase, client_secret) = match request.payment_method_id {
        Some(method) if purchase.status == PurchaseStatus::AwaitingPaymentMethod => {
            let step = state
                .orchestrator
                .select_payment_method(purchase.id, PaymentChoice::parse(&method))
                .await
                .map_err(|e| ApiError::from(e).with_existing(purchase.id))?;
            (step.purchase, step.client_handle)
        }
        _ => (purchase, None),
    };

    Ok((
        StatusCode::CREATED,
        Json(CreatePaymentIntentResponse {
            purchase_id: purchase.id,
            paid_from_balance: purchase.status == PurchaseStatus::Succeeded
                && purchase.amount_from_gateway == 0,
            amount_charged: amount_charged(&purchase),
            client_secret,
            status: Some(purchase.status.into()),
        }),
    ))
}

fn amount_charged(purchase: &Purchase) -> i64 {
    if purchase.status.is_paid() {
        purchase.amount_charged()
    } else {
        purchase.amount_from_balance
    }
}

/// `GET /purchases/{purchase_id}`
pub(super) async fn get_purchase(
    State(state): State<AppState>,
    Path(purchase_id): Path<Uuid>,
) -> Result<Json<PurchaseResponse>, ApiError> {
    let purchase = state.orchestrator.get(purchase_id).await?;
    Ok(Json(to_response(&purchase)))
}

/// `POST /purchases/{purchase_id}/payment-method`: charge a stored card, or
/// start the new-card flow with `"new"`.
///
/// A declined charge answers 402 and leaves the purchase waiting for another
/// method until the attempts run out.
pub(super) async fn select_payment_method(
    State(state): State<AppState>,
    Path(purchase_id): Path<Uuid>,
    ApiJson(request): ApiJson<SelectPaymentMethodRequest>,
) -> Result<Json<PurchaseResponse>, ApiError> {
    let step = state
        .orchestrator
        .select_payment_method(purchase_id, PaymentChoice::parse(&request.payment_method_id))
        .await?;

    let mut response = to_response(&step.purchase);
    if response.client_secret.is_none() {
        response.client_secret = step.client_handle;
    }
    Ok(Json(response))
}

/// `POST /purchases/{purchase_id}/confirm`: the client finished the gateway
/// confirmation step. The gateway has the final word on the outcome.
pub(super) async fn confirm_purchase(
    State(state): State<AppState>,
    Path(purchase_id): Path<Uuid>,
    ApiJson(request): ApiJson<ConfirmPurchaseRequest>,
) -> Result<Json<PurchaseResponse>, ApiError> {
    let reported = if request.succeeded {
        ConfirmationResult::Succeeded
    } else {
        ConfirmationResult::Failed {
            reason: request.reason,
        }
    };
    let purchase = state
        .orchestrator
        .confirm_gateway(purchase_id, reported)
        .await?;
    Ok(Json(to_response(&purchase)))
}

/// `POST /purchases/{purchase_id}/back`
pub(super) async fn return_to_payment_method(
    State(state): State<AppState>,
    Path(purchase_id): Path<Uuid>,
) -> Result<Json<PurchaseResponse>, ApiError> {
    let purchase = state
        .orchestrator
        .return_to_payment_method(purchase_id)
        .await?;
    Ok(Json(to_response(&purchase)))
}

/// `POST /purchases/{purchase_id}/abandon`
pub(super) async fn abandon_purchase(
    State(state): State<AppState>,
    Path(purchase_id): Path<Uuid>,
) -> Result<Json<PurchaseResponse>, ApiError> {
    let purchase = state.orchestrator.abandon(purchase_id).await?;
    Ok(Json(to_response(&purchase)))
}

/// `POST /purchases/{purchase_id}/customer-response`: the customer answered
/// the pro, so the money-back guarantee no longer applies.
pub(super) async fn customer_response(
    State(state): State<AppState>,
    Path(purchase_id): Path<Uuid>,
) -> Result<Json<CustomerResponseAck>, ApiError> {
    state.orchestrator.get(purchase_id).await?;
    let cancellation = state.scheduler.cancel(purchase_id).await?;
    Ok(Json(CustomerResponseAck {
        purchase_id,
        timer: cancellation.into(),
    }))
}

//! Marketplace API handlers.
//!
//! Called by the marketplace frontend and backend on behalf of a pro.
//! Authentication happens in front of this service.
//!
//! # Endpoints
//!
//! - `POST /lead-pricing`                           – quote the price of a lead
//! - `GET  /balance/{pro_id}`                       – current prepaid balance
//! - `POST /balance/{pro_id}/top-up`                – credit a settled top-up
//! - `GET  /payment-methods/{pro_id}`               – stored cards, default first
//! - `POST /create-payment-intent`                  – open a purchase
//! - `GET  /purchases/{purchase_id}`                – purchase status
//! - `POST /purchases/{purchase_id}/payment-method` – charge a card or start a new one
//! - `POST /purchases/{purchase_id}/confirm`        – finish a gateway confirmation
//! - `POST /purchases/{purchase_id}/back`           – back to method selection
//! - `POST /purchases/{purchase_id}/abandon`        – give up on the purchase
//! - `POST /purchases/{purchase_id}/customer-response` – stop the money-back timer

mod balance;
mod payment_methods;
mod pricing;
mod purchases;

use axum::{
    Router,
    routing::{get, post},
};
use leadpay_core::entities::Purchase;
use leadpay_sdk::objects::PurchaseResponse;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/lead-pricing", post(pricing::lead_pricing))
        .route("/balance/{pro_id}", get(balance::get_balance))
        .route("/balance/{pro_id}/top-up", post(balance::top_up))
        .route(
            "/payment-methods/{pro_id}",
            get(payment_methods::list_payment_methods),
        )
        .route(
            "/create-payment-intent",
            post(purchases::create_payment_intent),
        )
        .route("/purchases/{purchase_id}", get(purchases::get_purchase))
        .route(
            "/purchases/{purchase_id}/payment-method",
            post(purchases::select_payment_method),
        )
        .route(
            "/purchases/{purchase_id}/confirm",
            post(purchases::confirm_purchase),
        )
        .route(
            "/purchases/{purchase_id}/back",
            post(purchases::return_to_payment_method),
        )
        .route(
            "/purchases/{purchase_id}/abandon",
            post(purchases::abandon_purchase),
        )
        .route(
            "/purchases/{purchase_id}/customer-response",
            post(purchases::customer_response),
        )
}

/// Convert a `Purchase` (DB model) into a `PurchaseResponse` (API model).
fn to_response(purchase: &Purchase) -> PurchaseResponse {
    PurchaseResponse {
        purchase_id: purchase.id,
        job_id: purchase.job_id,
        pro_id: purchase.pro_id,
        status: purchase.status.into(),
        final_price_huf: purchase.final_price(),
        amount_from_balance: purchase.amount_from_balance,
        amount_from_gateway: purchase.amount_from_gateway,
        gateway_attempts: u32::try_from(purchase.gateway_attempts).unwrap_or_default(),
        client_secret: purchase.client_secret.clone(),
        failure_reason: purchase.failure_reason.clone(),
        created_at: purchase.created_at.unix_timestamp(),
        updated_at: purchase.updated_at.unix_timestamp(),
    }
}

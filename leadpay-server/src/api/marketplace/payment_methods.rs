use axum::{
    Json,
    extract::{Path, State},
};
use leadpay_sdk::objects::{PaymentMethodResponse, PaymentMethodsResponse};
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::state::AppState;

/// `GET /payment-methods/{pro_id}`: the pro's stored cards, default first.
pub(super) async fn list_payment_methods(
    State(state): State<AppState>,
    Path(pro_id): Path<Uuid>,
) -> Result<Json<PaymentMethodsResponse>, ApiError> {
    let payment_methods = state
        .vault
        .list(pro_id)
        .await?
        .into_iter()
        .map(|method| PaymentMethodResponse {
            id: method.id,
            brand: method.brand,
            last4: method.last4,
            exp_month: method.exp_month,
            exp_year: method.exp_year,
            is_default: method.is_default,
        })
        .collect();

    Ok(Json(PaymentMethodsResponse { payment_methods }))
}

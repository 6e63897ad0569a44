use axum::{Json, extract::State};
use leadpay_sdk::objects::{LeadPricingRequest, LeadPricingResponse};
use time::OffsetDateTime;

use crate::api::error::ApiError;
use crate::api::extractors::ApiJson;
use crate::state::AppState;

/// `POST /lead-pricing`: quote the price of one lead.
///
/// The quote is valid until `expiresAt`; `POST /create-payment-intent`
/// rejects it afterwards or once the band price changed.
pub(super) async fn lead_pricing(
    State(state): State<AppState>,
    ApiJson(request): ApiJson<LeadPricingRequest>,
) -> Result<Json<LeadPricingResponse>, ApiError> {
    let quote = state
        .pricing
        .quote(
            &request.service_category,
            request.job_size,
            request.urgency,
            request.city_tier,
            OffsetDateTime::now_utc(),
        )
        .await?;

    Ok(Json(LeadPricingResponse {
        currency: quote.breakdown.currency.to_string(),
        lead_price_huf: quote.breakdown.final_price,
        breakdown: quote.breakdown.to_response(),
        quoted_at: quote.quoted_at.unix_timestamp(),
        expires_at: quote.expires_at.unix_timestamp(),
    }))
}

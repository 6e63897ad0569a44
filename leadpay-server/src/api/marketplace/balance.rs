use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use leadpay_core::entities::LedgerEntry;
use leadpay_sdk::objects::{BalanceResponse, LedgerEntryResponse, TopUpRequest, TopUpResponse};
use uuid::Uuid;

use crate::api::error::ApiError;
use crate::api::extractors::ApiJson;
use crate::state::AppState;

fn entry_response(entry: &LedgerEntry) -> LedgerEntryResponse {
    LedgerEntryResponse {
        id: entry.id,
        amount_huf: entry.amount,
        reason: entry.reason.to_string(),
        purchase_id: entry.purchase_id,
        created_at: entry.created_at.unix_timestamp(),
    }
}

/// `GET /balance/{pro_id}`
pub(super) async fn get_balance(
    State(state): State<AppState>,
    Path(pro_id): Path<Uuid>,
) -> Result<Json<BalanceResponse>, ApiError> {
    let balance_huf = state.ledger.balance_of(pro_id).await?;
    Ok(Json(BalanceResponse { balance_huf }))
}

/// `POST /balance/{pro_id}/top-up`: credit a top-up that was paid elsewhere.
pub(super) async fn top_up(
    State(state): State<AppState>,
    Path(pro_id): Path<Uuid>,
    ApiJson(request): ApiJson<TopUpRequest>,
) -> Result<(StatusCode, Json<TopUpResponse>), ApiError> {
    let reference = Some(request.reference).filter(|r| !r.is_empty());
    let entry = state
        .ledger
        .top_up(pro_id, request.amount_huf, reference)
        .await?;
    let balance_huf = state.ledger.balance_of(pro_id).await?;

    Ok((
        StatusCode::CREATED,
        Json(TopUpResponse {
            entry: entry_response(&entry),
            balance_huf,
        }),
    ))
}

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// `GET /balance/{proId}` response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    pub balance_huf: i64,
}

/// `POST /balance/{proId}/top-up` request body.
///
/// `reference` identifies the external wallet top-up that funded the credit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopUpRequest {
    pub amount_huf: i64,
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopUpResponse {
    pub entry: LedgerEntryResponse,
    pub balance_huf: i64,
}

/// A single ledger entry. Credits carry a positive amount, debits a negative one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntryResponse {
    pub id: i64,
    pub amount_huf: i64,
    pub reason: String,
    pub purchase_id: Option<Uuid>,
    pub created_at: i64,
}

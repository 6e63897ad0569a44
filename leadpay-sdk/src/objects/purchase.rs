//! Purchase flow payloads.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::pricing::PriceBreakdownResponse;

/// Payment method id that starts the fresh-card flow instead of charging a stored card.
pub const NEW_PAYMENT_METHOD: &str = "new";

/// Purchase status for API responses.
///
/// This is the API/DTO version without sqlx::Type.
/// For database operations, use the version in `leadpay-core::entities`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseStatus {
    Pending,
    AwaitingPaymentMethod,
    AwaitingGatewayConfirmation,
    Succeeded,
    RefundPending,
    Refunded,
    Failed,
}

impl std::fmt::Display for PurchaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PurchaseStatus::Pending => "pending",
            PurchaseStatus::AwaitingPaymentMethod => "awaiting_payment_method",
            PurchaseStatus::AwaitingGatewayConfirmation => "awaiting_gateway_confirmation",
            PurchaseStatus::Succeeded => "succeeded",
            PurchaseStatus::RefundPending => "refund_pending",
            PurchaseStatus::Refunded => "refunded",
            PurchaseStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// `POST /create-payment-intent` request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentIntentRequest {
    pub pro_id: Uuid,
    pub job_id: Uuid,
    pub breakdown: PriceBreakdownResponse,
    pub quoted_at: i64,
    pub expires_at: i64,
    /// A stored method id, or [`NEW_PAYMENT_METHOD`].
    #[serde(default)]
    pub payment_method_id: Option<String>,
}

/// `POST /create-payment-intent` response body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePaymentIntentResponse {
    pub purchase_id: Uuid,
    /// The balance covered the whole price; no gateway step follows.
    pub paid_from_balance: bool,
    /// Amount taken from the pro so far: the balance portion, plus the
    /// gateway portion once its charge succeeded.
    pub amount_charged: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<PurchaseStatus>,
}

/// `POST /purchases/{purchaseId}/payment-method` request body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectPaymentMethodRequest {
    pub payment_method_id: String,
}

/// `POST /purchases/{purchaseId}/confirm` request body, as reported by the client
/// after it finished the gateway confirmation step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPurchaseRequest {
    pub succeeded: bool,
    #[serde(default)]
    pub reason: Option<String>,
}

/// Full purchase view returned by the `/purchases/{purchaseId}` endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PurchaseResponse {
    pub purchase_id: Uuid,
    pub job_id: Uuid,
    pub pro_id: Uuid,
    pub status: PurchaseStatus,
    pub final_price_huf: i64,
    pub amount_from_balance: i64,
    pub amount_from_gateway: i64,
    pub gateway_attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// State of the money-back timer after a customer-response notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundTimerState {
    Cancelled,
    AlreadyCancelled,
    AlreadyFired,
    NotArmed,
}

/// `POST /purchases/{purchaseId}/customer-response` response body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerResponseAck {
    pub purchase_id: Uuid,
    pub timer: RefundTimerState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_payment_intent_request_without_method() {
        let json = r#"{
            "proId": "0190c3a2-7d3e-7c3a-9a51-1f2c1e0d4b55",
            "jobId": "0190c3a2-7d3e-7c3a-9a51-1f2c1e0d4b56",
            "breakdown": {
                "baseBandId": "plumbing:medium",
                "baseBandLeadPriceHuf": 10000,
                "appliedUrgencyMultiplier": 1.5,
                "appliedCityTierMultiplier": 1.2,
                "effectiveMultiplier": 1.8,
                "finalLeadPriceHuf": 18000
            },
            "quotedAt": 1700000000,
            "expiresAt": 1700000900
        }"#;
        let request: CreatePaymentIntentRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.payment_method_id, None);
        assert_eq!(request.breakdown.final_lead_price_huf, 18_000);
    }

    #[test]
    fn test_optional_fields_are_omitted() {
        let response = CreatePaymentIntentResponse {
            purchase_id: Uuid::nil(),
            paid_from_balance: true,
            amount_charged: 18_000,
            client_secret: None,
            status: Some(PurchaseStatus::Succeeded),
        };
        let value = serde_json::to_value(&response).unwrap();
        assert!(value.get("clientSecret").is_none());
        assert_eq!(value["status"], "succeeded");
        assert_eq!(value["paidFromBalance"], true);
    }
}

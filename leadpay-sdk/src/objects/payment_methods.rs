use serde::{Deserialize, Serialize};

/// A stored card as shown in the payment method picker.
///
/// `id` is the gateway's opaque token; raw card data never reaches this service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMethodResponse {
    pub id: String,
    pub brand: String,
    pub last4: String,
    pub exp_month: u8,
    pub exp_year: u16,
    pub is_default: bool,
}

/// `GET /payment-methods/{proId}` response body, default method first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMethodsResponse {
    pub payment_methods: Vec<PaymentMethodResponse>,
}

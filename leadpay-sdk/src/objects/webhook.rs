//! Webhook payloads: events pushed to the marketplace, and events received
//! from the payment gateway.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::signature::Signature;

/// Kind of lead event pushed to the marketplace callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadEventType {
    LeadUnlocked,
    LeadRefunded,
    PurchaseFailed,
}

/// Signed payload POSTed to the marketplace callback URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadEventPayload {
    pub event_type: LeadEventType,
    pub purchase_id: Uuid,
    pub job_id: Uuid,
    pub pro_id: Uuid,
    pub amount_huf: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub timestamp: i64,
}

impl Signature for LeadEventPayload {}

/// Event delivered by the payment gateway to `POST /gateway/webhook`.
///
/// Field names follow the gateway's snake_case convention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayWebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: GatewayWebhookData,
}

impl Signature for GatewayWebhookEvent {}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayWebhookData {
    pub object: GatewayIntentObject,
}

/// The payment intent as carried inside a gateway webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayIntentObject {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub cancellation_reason: Option<String>,
}

impl GatewayIntentObject {
    /// Metadata key under which the purchase id is stored on every intent.
    pub const PURCHASE_ID_KEY: &'static str = "purchase_id";

    pub fn purchase_id(&self) -> Option<Uuid> {
        self.metadata
            .get(Self::PURCHASE_ID_KEY)
            .and_then(|id| Uuid::parse_str(id).ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_event_parsing() {
        let json = r#"{
            "id": "evt_1",
            "type": "payment_intent.succeeded",
            "data": {
                "object": {
                    "id": "pi_123",
                    "status": "succeeded",
                    "metadata": { "purchase_id": "0190c3a2-7d3e-7c3a-9a51-1f2c1e0d4b55" }
                }
            }
        }"#;
        let event: GatewayWebhookEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.event_type, "payment_intent.succeeded");
        assert_eq!(
            event.data.object.purchase_id(),
            Some(Uuid::parse_str("0190c3a2-7d3e-7c3a-9a51-1f2c1e0d4b55").unwrap())
        );
    }

    #[test]
    fn test_missing_purchase_id() {
        let object = GatewayIntentObject {
            id: "pi_1".into(),
            status: "succeeded".into(),
            metadata: HashMap::from([("purchase_id".to_string(), "nope".to_string())]),
            cancellation_reason: None,
        };
        assert_eq!(object.purchase_id(), None);
    }
}

//! Payment gateway webhook.
//!
//! The gateway reports intent outcomes here as well as to the client. This
//! closes the window where a charge succeeded but the purchase never heard
//! about it, e.g. because the client vanished before confirming.
//!
//! # Endpoints
//!
//! - `POST /gateway/webhook` – signed with `Leadpay-Gateway-Signature`

use axum::{Router, extract::State, http::StatusCode, routing::post};
use leadpay_core::purchase::PurchaseError;
use leadpay_core::vault::GatewayOutcome;
use leadpay_sdk::objects::GatewayWebhookEvent;
use tracing::{debug, info, warn};

use crate::api::error::ApiError;
use crate::api::extractors::GatewaySignedBody;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/gateway/webhook", post(gateway_webhook))
}

/// Translate a webhook event into the outcome it reports, if it reports one.
fn outcome_of(event: &GatewayWebhookEvent) -> Option<GatewayOutcome> {
    let intent = &event.data.object;
    let reference = intent.id.clone();
    match event.event_type.as_str() {
        "payment_intent.succeeded" => Some(GatewayOutcome::Succeeded { reference }),
        "payment_intent.payment_failed" => Some(GatewayOutcome::Declined {
            reference: Some(reference),
            reason: "payment failed".to_owned(),
        }),
        "payment_intent.canceled" => Some(GatewayOutcome::Declined {
            reference: Some(reference),
            reason: match &intent.cancellation_reason {
                Some(why) => format!("payment canceled ({why})"),
                None => "payment canceled".to_owned(),
            },
        }),
        _ => None,
    }
}

/// `POST /gateway/webhook`
///
/// Events that cannot be matched to a purchase are acknowledged so the
/// gateway stops redelivering them. Store failures answer 5xx so it retries.
async fn gateway_webhook(
    State(state): State<AppState>,
    GatewaySignedBody(event): GatewaySignedBody<GatewayWebhookEvent>,
) -> Result<StatusCode, ApiError> {
    let Some(outcome) = outcome_of(&event) else {
        debug!(event_id = %event.id, event_type = %event.event_type, "Ignoring gateway event");
        return Ok(StatusCode::OK);
    };
    let Some(purchase_id) = event.data.object.purchase_id() else {
        warn!(
            event_id = %event.id,
            intent = %event.data.object.id,
            "Gateway event without a purchase id"
        );
        return Ok(StatusCode::OK);
    };

    match state
        .orchestrator
        .apply_gateway_outcome(purchase_id, outcome)
        .await
    {
        Ok(purchase) => {
            info!(
                event_id = %event.id,
                purchase_id = %purchase_id,
                status = %purchase.status,
                "Gateway event applied"
            );
            Ok(StatusCode::OK)
        }
        Err(PurchaseError::PurchaseNotFound(_)) => {
            warn!(
                event_id = %event.id,
                purchase_id = %purchase_id,
                "Gateway event for unknown purchase"
            );
            Ok(StatusCode::OK)
        }
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadpay_sdk::objects::{GatewayIntentObject, GatewayWebhookData};
    use std::collections::HashMap;

    fn event(event_type: &str, cancellation_reason: Option<&str>) -> GatewayWebhookEvent {
        GatewayWebhookEvent {
            id: "evt_1".into(),
            event_type: event_type.into(),
            data: GatewayWebhookData {
                object: GatewayIntentObject {
                    id: "pi_1".into(),
                    status: "canceled".into(),
                    metadata: HashMap::new(),
                    cancellation_reason: cancellation_reason.map(str::to_owned),
                },
            },
        }
    }

    #[test]
    fn test_outcome_mapping() {
        assert_eq!(
            outcome_of(&event("payment_intent.succeeded", None)),
            Some(GatewayOutcome::Succeeded {
                reference: "pi_1".into()
            })
        );
        assert_eq!(
            outcome_of(&event("payment_intent.canceled", Some("abandoned"))),
            Some(GatewayOutcome::Declined {
                reference: Some("pi_1".into()),
                reason: "payment canceled (abandoned)".into(),
            })
        );
        assert_eq!(outcome_of(&event("charge.refunded", None)), None);
    }
}

use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode, header},
};
use leadpay_core::config::{
    CoveragePolicy, GatewayConfig, NotifierConfig, PricingPolicy, PurchasePolicy, RefundPolicy,
    ServerConfig,
};
use leadpay_core::events::{LeadEvent, LeadEventReceiver, lead_event_channel};
use leadpay_core::gateway::GatewayIntentError;
use leadpay_core::pricing::{BandCatalog, PriceBand};
use leadpay_core::store::MemoryStore;
use leadpay_core::testing::{ScriptedGateway, card, intent};
use leadpay_sdk::objects::{
    CreatePaymentIntentRequest, GatewayIntentObject, GatewayWebhookData, GatewayWebhookEvent,
    JobSize, LeadPricingResponse,
};
use leadpay_sdk::signature::{GATEWAY_SIGNATURE_HEADER, SignedObject};
use rust_decimal_macros::dec;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

use crate::config::LoadedConfig;
use crate::server::build_router;
use crate::state::AppState;

const WEBHOOK_SECRET: &[u8] = b"whsec_test";

struct TestApp {
    router: Router,
    gateway: ScriptedGateway,
    events: LeadEventReceiver,
}

async fn app(gateway: ScriptedGateway, coverage: CoveragePolicy) -> TestApp {
    let config = LoadedConfig {
        server: ServerConfig {
            listen: "127.0.0.1:0".parse().unwrap(),
        },
        gateway: GatewayConfig {
            base_url: "https://gateway.test/".parse().unwrap(),
            secret_key: "sk_test".into(),
            webhook_secret: Box::from(WEBHOOK_SECRET),
            customer_prefix: "cus_".into(),
            timeout: std::time::Duration::from_secs(5),
        },
        notifier: NotifierConfig {
            callback_url: None,
            secret: Box::from(&b"notifier"[..]),
            max_attempts: 1,
        },
        pricing: PricingPolicy::default(),
        bands: BandCatalog::new([PriceBand::new("plumbing", JobSize::Medium, 10_000, "HUF")])
            .unwrap(),
        purchase: PurchasePolicy {
            coverage,
            ..PurchasePolicy::default()
        },
        refund: RefundPolicy::default(),
    }
    .into_shared();

    let (tx, rx) = lead_event_channel();
    let state = AppState::new(
        config,
        Arc::new(MemoryStore::new()),
        Arc::new(gateway.clone()),
        "cus_".into(),
        tx,
    )
    .await;
    TestApp {
        router: build_router(state),
        gateway,
        events: rx,
    }
}

async fn partial_app(gateway: ScriptedGateway) -> TestApp {
    app(gateway, CoveragePolicy::Partial).await
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Request::get(uri).body(Body::empty()).unwrap())
            .await
    }

    async fn post(&self, uri: &str, body: Value) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method(Method::POST)
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn top_up(&self, pro_id: Uuid, amount: i64) {
        let (status, _) = self
            .post(
                &format!("/balance/{pro_id}/top-up"),
                json!({ "amountHuf": amount, "reference": "bank-transfer-1" }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
    }

    /// Quote the 18,000 HUF lead: plumbing, medium, asap, central Budapest.
    async fn quote(&self) -> LeadPricingResponse {
        let (status, body) = self
            .post(
                "/lead-pricing",
                json!({
                    "serviceCategory": "plumbing",
                    "jobSize": "medium",
                    "urgency": "asap",
                    "cityTier": "budapest_central"
                }),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "{body}");
        serde_json::from_value(body).unwrap()
    }

    async fn create(
        &self,
        pro_id: Uuid,
        job_id: Uuid,
        payment_method_id: Option<&str>,
    ) -> (StatusCode, Value) {
        let quote = self.quote().await;
        let request = CreatePaymentIntentRequest {
            pro_id,
            job_id,
            breakdown: quote.breakdown,
            quoted_at: quote.quoted_at,
            expires_at: quote.expires_at,
            payment_method_id: payment_method_id.map(str::to_owned),
        };
        self.post(
            "/create-payment-intent",
            serde_json::to_value(request).unwrap(),
        )
        .await
    }

    async fn balance(&self, pro_id: Uuid) -> i64 {
        let (status, body) = self.get(&format!("/balance/{pro_id}")).await;
        assert_eq!(status, StatusCode::OK);
        body["balanceHuf"].as_i64().unwrap()
    }
}

fn purchase_id(body: &Value) -> Uuid {
    body["purchaseId"].as_str().unwrap().parse().unwrap()
}

#[tokio::test]
async fn test_health() {
    let app = partial_app(ScriptedGateway::new()).await;
    let (status, body) = app.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_lead_pricing() {
    let app = partial_app(ScriptedGateway::new()).await;
    let quote = app.quote().await;
    assert_eq!(quote.currency, "HUF");
    assert_eq!(quote.lead_price_huf, 18_000);
    assert_eq!(quote.breakdown.base_band_id, "plumbing:medium");
    assert_eq!(quote.breakdown.applied_urgency_multiplier, dec!(1.5));
    assert_eq!(quote.breakdown.applied_city_tier_multiplier, dec!(1.2));
    assert_eq!(quote.breakdown.effective_multiplier, dec!(1.8));
    assert_eq!(quote.expires_at - quote.quoted_at, 15 * 60);
}

#[tokio::test]
async fn test_lead_pricing_input_errors() {
    let app = partial_app(ScriptedGateway::new()).await;
    let (status, body) = app
        .post(
            "/lead-pricing",
            json!({
                "serviceCategory": "roofing",
                "jobSize": "medium",
                "urgency": "asap",
                "cityTier": "town"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "unknown_band");
    assert_eq!(body["retrySafe"], "after_correction");

    let (status, body) = app
        .post(
            "/lead-pricing",
            json!({
                "serviceCategory": "plumbing",
                "jobSize": "enormous",
                "urgency": "asap",
                "cityTier": "town"
            }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_request");
}

#[tokio::test]
async fn test_top_up_and_balance() {
    let app = partial_app(ScriptedGateway::new()).await;
    let pro_id = Uuid::now_v7();
    assert_eq!(app.balance(pro_id).await, 0);

    let (status, body) = app
        .post(
            &format!("/balance/{pro_id}/top-up"),
            json!({ "amountHuf": 7_500, "reference": "bank-1" }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["balanceHuf"], 7_500);
    assert_eq!(body["entry"]["reason"], "top_up");

    let (status, body) = app
        .post(
            &format!("/balance/{pro_id}/top-up"),
            json!({ "amountHuf": 0, "reference": "bank-2" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "invalid_amount");
    assert_eq!(app.balance(pro_id).await, 7_500);
}

#[tokio::test]
async fn test_purchase_paid_from_balance() {
    let mut app = partial_app(ScriptedGateway::new()).await;
    let (pro_id, job_id) = (Uuid::now_v7(), Uuid::now_v7());
    app.top_up(pro_id, 20_000).await;

    let (status, body) = app.create(pro_id, job_id, None).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["paidFromBalance"], true);
    assert_eq!(body["amountCharged"], 18_000);
    assert_eq!(body["status"], "succeeded");
    assert_eq!(app.balance(pro_id).await, 2_000);
    assert!(matches!(
        app.events.try_recv(),
        Ok(LeadEvent::LeadUnlocked { amount: 18_000, .. })
    ));

    let (status, duplicate) = app.create(pro_id, job_id, None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(duplicate["error"], "duplicate_active_purchase");
    assert_eq!(duplicate["existingPurchaseId"], body["purchaseId"]);
    assert_eq!(duplicate["retrySafe"], "never");
}

#[tokio::test]
async fn test_stale_quote_is_rejected() {
    let app = partial_app(ScriptedGateway::new()).await;
    let quote = app.quote().await;
    let mut breakdown = quote.breakdown;
    breakdown.final_lead_price_huf = 1;
    let request = CreatePaymentIntentRequest {
        pro_id: Uuid::now_v7(),
        job_id: Uuid::now_v7(),
        breakdown,
        quoted_at: quote.quoted_at,
        expires_at: quote.expires_at,
        payment_method_id: None,
    };
    let (status, body) = app
        .post(
            "/create-payment-intent",
            serde_json::to_value(request).unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "stale_quote");
}

#[tokio::test]
async fn test_full_coverage_requires_balance() {
    let app = app(ScriptedGateway::new(), CoveragePolicy::Full).await;
    let pro_id = Uuid::now_v7();
    app.top_up(pro_id, 5_000).await;

    let (status, body) = app.create(pro_id, Uuid::now_v7(), None).await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["error"], "insufficient_balance");
    assert_eq!(app.balance(pro_id).await, 5_000);
}

#[tokio::test]
async fn test_stored_card_charged_in_create_call() {
    let gateway = ScriptedGateway::new()
        .with_methods(vec![card("pm_1", "4242")])
        .with_default("pm_1")
        .then_create(Ok(intent("pi_1", "succeeded")));
    let app = partial_app(gateway).await;
    let pro_id = Uuid::now_v7();
    app.top_up(pro_id, 5_000).await;

    let (status, body) = app.create(pro_id, Uuid::now_v7(), Some("pm_1")).await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["paidFromBalance"], false);
    assert_eq!(body["amountCharged"], 18_000);
    assert_eq!(body["status"], "succeeded");

    let created = app.gateway.created_intents();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].amount, 13_000);
    assert_eq!(created[0].customer, format!("cus_{pro_id}"));
    assert_eq!(app.balance(pro_id).await, 0);
}

#[tokio::test]
async fn test_declined_card_then_abandon_restores_balance() {
    let mut declined = intent("pi_1", "requires_payment_method");
    declined.last_payment_error = Some(GatewayIntentError {
        code: Some("card_declined".into()),
        decline_code: Some("insufficient_funds".into()),
        message: None,
    });
    let gateway = ScriptedGateway::new()
        .with_methods(vec![card("pm_1", "4242")])
        .then_create(Ok(declined));
    let app = partial_app(gateway).await;
    let pro_id = Uuid::now_v7();
    app.top_up(pro_id, 5_000).await;

    let (status, body) = app.create(pro_id, Uuid::now_v7(), None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "awaiting_payment_method");
    assert_eq!(body["amountCharged"], 5_000);
    let id = purchase_id(&body);
    assert_eq!(app.balance(pro_id).await, 0);

    let (status, body) = app
        .post(
            &format!("/purchases/{id}/payment-method"),
            json!({ "paymentMethodId": "pm_1" }),
        )
        .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["error"], "payment_declined");

    let (status, body) = app
        .post(
            &format!("/purchases/{id}/payment-method"),
            json!({ "paymentMethodId": "pm_unknown" }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "unknown_payment_method");

    let (status, body) = app
        .post(&format!("/purchases/{id}/abandon"), Value::Null)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "failed");
    assert_eq!(app.balance(pro_id).await, 5_000);
}

#[tokio::test]
async fn test_new_card_flow_back_and_confirm() {
    let gateway = ScriptedGateway::new()
        .then_create(Ok(intent("pi_1", "requires_payment_method")))
        .then_create(Ok(intent("pi_2", "requires_action")));
    let app = partial_app(gateway).await;
    let pro_id = Uuid::now_v7();

    let (status, body) = app.create(pro_id, Uuid::now_v7(), Some("new")).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "awaiting_gateway_confirmation");
    assert_eq!(body["clientSecret"], "pi_1_secret");
    let id = purchase_id(&body);

    let (status, body) = app
        .post(&format!("/purchases/{id}/back"), Value::Null)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "awaiting_payment_method");
    assert_eq!(app.gateway.cancelled_intents(), vec!["pi_1".to_owned()]);

    let (status, body) = app
        .post(
            &format!("/purchases/{id}/payment-method"),
            json!({ "paymentMethodId": "new" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["clientSecret"], "pi_2_secret");

    // The client claims success before the gateway agrees.
    let (status, body) = app
        .post(
            &format!("/purchases/{id}/confirm"),
            json!({ "succeeded": true }),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"], "confirmation_pending");

    app.gateway.set_status("pi_2", "succeeded");
    let (status, body) = app
        .post(
            &format!("/purchases/{id}/confirm"),
            json!({ "succeeded": true }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "succeeded");
    assert_eq!(body["amountFromGateway"], 18_000);
}

#[tokio::test]
async fn test_customer_response_cancels_timer() {
    let app = partial_app(ScriptedGateway::new()).await;
    let pro_id = Uuid::now_v7();
    app.top_up(pro_id, 18_000).await;
    let (_, body) = app.create(pro_id, Uuid::now_v7(), None).await;
    let id = purchase_id(&body);

    let uri = format!("/purchases/{id}/customer-response");
    let (status, body) = app.post(&uri, Value::Null).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["timer"], "cancelled");

    let (_, body) = app.post(&uri, Value::Null).await;
    assert_eq!(body["timer"], "already_cancelled");

    let (status, body) = app
        .post(
            &format!("/purchases/{}/customer-response", Uuid::now_v7()),
            Value::Null,
        )
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"], "purchase_not_found");
}

fn webhook_event(event_type: &str, intent_id: &str, purchase_id: Uuid) -> GatewayWebhookEvent {
    GatewayWebhookEvent {
        id: "evt_1".into(),
        event_type: event_type.into(),
        data: GatewayWebhookData {
            object: GatewayIntentObject {
                id: intent_id.into(),
                status: "succeeded".into(),
                metadata: HashMap::from([(
                    GatewayIntentObject::PURCHASE_ID_KEY.to_owned(),
                    purchase_id.to_string(),
                )]),
                cancellation_reason: None,
            },
        },
    }
}

fn webhook_request(event: GatewayWebhookEvent, secret: &[u8]) -> Request<Body> {
    let signed = SignedObject::new(event, secret).unwrap();
    Request::builder()
        .method(Method::POST)
        .uri("/gateway/webhook")
        .header(header::CONTENT_TYPE, "application/json")
        .header(GATEWAY_SIGNATURE_HEADER, signed.to_header())
        .body(Body::from(signed.json))
        .unwrap()
}

#[tokio::test]
async fn test_gateway_webhook_settles_purchase() {
    let gateway = ScriptedGateway::new().then_create(Ok(intent("pi_1", "requires_action")));
    let app = partial_app(gateway).await;
    let (_, body) = app.create(Uuid::now_v7(), Uuid::now_v7(), Some("new")).await;
    let id = purchase_id(&body);

    let event = webhook_event("payment_intent.succeeded", "pi_1", id);
    let (status, body) = app
        .send(webhook_request(event.clone(), b"wrong-secret"))
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    let (status, _) = app.send(webhook_request(event, WEBHOOK_SECRET)).await;
    assert_eq!(status, StatusCode::OK);

    let (_, body) = app.get(&format!("/purchases/{id}")).await;
    assert_eq!(body["status"], "succeeded");

    // Unknown purchases are acknowledged so the gateway stops redelivering.
    let stray = webhook_event("payment_intent.succeeded", "pi_9", Uuid::now_v7());
    let (status, _) = app.send(webhook_request(stray, WEBHOOK_SECRET)).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_payment_methods_default_first() {
    let gateway = ScriptedGateway::new()
        .with_methods(vec![card("pm_1", "1111"), card("pm_2", "2222")])
        .with_default("pm_2");
    let app = partial_app(gateway).await;

    let (status, body) = app
        .get(&format!("/payment-methods/{}", Uuid::now_v7()))
        .await;
    assert_eq!(status, StatusCode::OK);
    let methods = body["paymentMethods"].as_array().unwrap();
    assert_eq!(methods.len(), 2);
    assert_eq!(methods[0]["id"], "pm_2");
    assert_eq!(methods[0]["isDefault"], true);
    assert_eq!(methods[1]["last4"], "1111");

    app.gateway.set_unavailable(true);
    let (status, body) = app
        .get(&format!("/payment-methods/{}", Uuid::now_v7()))
        .await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["retrySafe"], "safe");
}

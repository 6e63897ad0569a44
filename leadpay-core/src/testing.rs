//! Test fixtures: a scripted payment gateway and sample values.
//!
//! Compiled for this crate's tests and, with the `testing` feature, for the
//! tests of crates depending on it.

#![allow(clippy::unwrap_used)]

use crate::gateway::{
    GatewayCard, GatewayCustomerMethods, GatewayError, GatewayIntent, GatewayPaymentMethod,
    IntentRequest, PaymentGateway,
};
use crate::pricing::PriceBreakdown;
use async_trait::async_trait;
use compact_str::CompactString;
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use time::OffsetDateTime;
use tokio::sync::Notify;
use uuid::Uuid;

/// `1_700_000_000 + seconds` as a timestamp.
pub fn ts(seconds: i64) -> OffsetDateTime {
    OffsetDateTime::from_unix_timestamp(1_700_000_000 + seconds).unwrap()
}

/// A flat breakdown whose final price is `price`.
pub fn breakdown(price: i64) -> PriceBreakdown {
    PriceBreakdown {
        band_id: "plumbing:medium".into(),
        base_price: price,
        urgency_multiplier: Decimal::ONE,
        city_tier_multiplier: Decimal::ONE,
        effective_multiplier: Decimal::ONE,
        final_price: price,
        currency: CompactString::const_new("HUF"),
    }
}

pub fn card(id: &str, last4: &str) -> GatewayPaymentMethod {
    GatewayPaymentMethod {
        id: id.to_owned(),
        card: Some(GatewayCard {
            brand: "visa".into(),
            last4: last4.to_owned(),
            exp_month: 12,
            exp_year: 2030,
        }),
    }
}

pub fn intent(id: &str, status: &str) -> GatewayIntent {
    GatewayIntent {
        id: id.to_owned(),
        status: status.to_owned(),
        client_secret: Some(format!("{id}_secret")),
        last_payment_error: None,
        cancellation_reason: None,
        metadata: HashMap::new(),
    }
}

enum CreateStep {
    Respond(Result<GatewayIntent, GatewayError>),
    /// The gateway creates the intent but the response never arrives.
    Lost(GatewayIntent),
}

/// Pauses the next `create_intent` call until [`CreateGate::release`].
#[derive(Clone, Default)]
pub struct CreateGate {
    entered: Arc<Notify>,
    release: Arc<Notify>,
}

impl CreateGate {
    /// Resolves once a `create_intent` call is parked on the gate.
    pub async fn entered(&self) {
        self.entered.notified().await;
    }

    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[derive(Default)]
struct Script {
    methods: Vec<GatewayPaymentMethod>,
    default_method: Option<String>,
    create: VecDeque<CreateStep>,
    intents: HashMap<String, GatewayIntent>,
    created: Vec<IntentRequest>,
    cancelled: Vec<String>,
    gate: Option<CreateGate>,
    refuse_cancel: bool,
    search_lagging: bool,
    unavailable: bool,
}

/// A gateway that replays queued responses and records what it was asked.
#[derive(Clone, Default)]
pub struct ScriptedGateway {
    script: Arc<Mutex<Script>>,
}

impl ScriptedGateway {
    pub fn new() -> Self {
        Self::default()
    }

    fn with(self, f: impl FnOnce(&mut Script)) -> Self {
        f(&mut self.script.lock().unwrap());
        self
    }

    pub fn with_methods(self, methods: Vec<GatewayPaymentMethod>) -> Self {
        self.with(|s| s.methods = methods)
    }

    pub fn with_default(self, id: &str) -> Self {
        self.with(|s| s.default_method = Some(id.to_owned()))
    }

    /// Queue the response of the next `create_intent` call.
    pub fn then_create(self, result: Result<GatewayIntent, GatewayError>) -> Self {
        self.with(|s| s.create.push_back(CreateStep::Respond(result)))
    }

    /// Queue a `create_intent` call that stores `intent` but times out.
    pub fn then_create_lost(self, intent: GatewayIntent) -> Self {
        self.with(|s| s.create.push_back(CreateStep::Lost(intent)))
    }

    /// Hold the next `create_intent` call at the returned gate.
    pub fn hold_next_create(&self) -> CreateGate {
        let gate = CreateGate::default();
        self.script.lock().unwrap().gate = Some(gate.clone());
        gate
    }

    /// Make intent search miss every intent, as a lagging search index does.
    pub fn search_lagging(self) -> Self {
        self.with(|s| s.search_lagging = true)
    }

    pub fn with_intent(self, intent: GatewayIntent) -> Self {
        self.with(|s| {
            s.intents.insert(intent.id.clone(), intent);
        })
    }

    /// Make `cancel_intent` fail as it does for an intent that already completed.
    pub fn refuse_cancel(self) -> Self {
        self.with(|s| s.refuse_cancel = true)
    }

    /// Change the status the gateway reports for an existing intent.
    pub fn set_status(&self, id: &str, status: &str) {
        let mut script = self.script.lock().unwrap();
        let entry = script
            .intents
            .entry(id.to_owned())
            .or_insert_with(|| intent(id, status));
        entry.status = status.to_owned();
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.script.lock().unwrap().unavailable = unavailable;
    }

    pub fn created_intents(&self) -> Vec<IntentRequest> {
        self.script.lock().unwrap().created.clone()
    }

    pub fn cancelled_intents(&self) -> Vec<String> {
        self.script.lock().unwrap().cancelled.clone()
    }

    fn check_available(script: &Script) -> Result<(), GatewayError> {
        if script.unavailable {
            return Err(GatewayError::Transport("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for ScriptedGateway {
    async fn customer_methods(
        &self,
        _customer: &str,
    ) -> Result<GatewayCustomerMethods, GatewayError> {
        let script = self.script.lock().unwrap();
        Self::check_available(&script)?;
        Ok(GatewayCustomerMethods {
            methods: script.methods.clone(),
            default_method: script.default_method.clone(),
        })
    }

    async fn create_intent(&self, request: &IntentRequest) -> Result<GatewayIntent, GatewayError> {
        let gate = self.script.lock().unwrap().gate.take();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        let mut script = self.script.lock().unwrap();
        Self::check_available(&script)?;
        script.created.push(request.clone());
        let step = script.create.pop_front().unwrap_or_else(|| {
            CreateStep::Respond(Err(GatewayError::Transport("no scripted response".into())))
        });
        let (mut stored, result) = match step {
            CreateStep::Respond(Ok(intent)) => (intent.clone(), Ok(intent)),
            CreateStep::Respond(Err(e)) => return Err(e),
            CreateStep::Lost(intent) => (intent, Err(GatewayError::Timeout)),
        };
        stored
            .metadata
            .insert("purchase_id".into(), request.purchase_id.to_string());
        script.intents.insert(stored.id.clone(), stored);
        result
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<GatewayIntent, GatewayError> {
        let script = self.script.lock().unwrap();
        Self::check_available(&script)?;
        script
            .intents
            .get(intent_id)
            .cloned()
            .ok_or_else(|| GatewayError::Api {
                status: 404,
                code: Some("resource_missing".into()),
                decline_code: None,
                message: format!("No such payment_intent: {intent_id}"),
            })
    }

    async fn cancel_intent(&self, intent_id: &str) -> Result<GatewayIntent, GatewayError> {
        let mut script = self.script.lock().unwrap();
        Self::check_available(&script)?;
        let refuse = script.refuse_cancel;
        let Some(intent) = script.intents.get_mut(intent_id) else {
            return Err(GatewayError::Api {
                status: 404,
                code: Some("resource_missing".into()),
                decline_code: None,
                message: format!("No such payment_intent: {intent_id}"),
            });
        };
        if refuse || intent.status == "succeeded" {
            return Err(GatewayError::Api {
                status: 400,
                code: Some("payment_intent_unexpected_state".into()),
                decline_code: None,
                message: "This PaymentIntent could not be canceled.".into(),
            });
        }
        intent.status = "canceled".into();
        let cancelled = intent.clone();
        script.cancelled.push(intent_id.to_owned());
        Ok(cancelled)
    }

    async fn purchase_intents(
        &self,
        purchase_id: Uuid,
    ) -> Result<Vec<GatewayIntent>, GatewayError> {
        let script = self.script.lock().unwrap();
        Self::check_available(&script)?;
        if script.search_lagging {
            return Ok(Vec::new());
        }
        let purchase_id = purchase_id.to_string();
        Ok(script
            .intents
            .values()
            .filter(|i| i.metadata.get("purchase_id") == Some(&purchase_id))
            .cloned()
            .collect())
    }
}

//! External payment gateway port.
//!
//! The shapes here mirror a Stripe-compatible PaymentIntents API. They stay
//! inside the core: [`crate::vault::PaymentMethodVault`] normalizes them before
//! anything else sees a gateway response.

mod http;

pub use http::HttpGateway;

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("gateway request timed out")]
    Timeout,

    #[error("gateway unreachable: {0}")]
    Transport(String),

    /// The gateway answered with an error object.
    #[error("gateway returned {status}: {message}")]
    Api {
        status: u16,
        code: Option<String>,
        decline_code: Option<String>,
        message: String,
    },

    #[error("unexpected gateway response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            GatewayError::Timeout
        } else if e.is_decode() {
            GatewayError::Decode(e.to_string())
        } else {
            GatewayError::Transport(e.to_string())
        }
    }
}

/// A stored card as the gateway reports it.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewayPaymentMethod {
    pub id: String,
    #[serde(default)]
    pub card: Option<GatewayCard>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewayCard {
    pub brand: String,
    pub last4: String,
    pub exp_month: u8,
    pub exp_year: u16,
}

/// The customer's stored cards plus the one marked as default.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GatewayCustomerMethods {
    pub methods: Vec<GatewayPaymentMethod>,
    pub default_method: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewayIntentError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub decline_code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// A payment intent.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GatewayIntent {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    #[serde(default)]
    pub last_payment_error: Option<GatewayIntentError>,
    #[serde(default)]
    pub cancellation_reason: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Parameters of one charge attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntentRequest {
    pub purchase_id: Uuid,
    pub customer: String,
    pub amount: i64,
    pub currency: String,
    /// Charge this stored card off-session; `None` starts the new-card flow.
    pub payment_method: Option<String>,
    pub idempotency_key: String,
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn customer_methods(
        &self,
        customer: &str,
    ) -> Result<GatewayCustomerMethods, GatewayError>;

    async fn create_intent(&self, request: &IntentRequest) -> Result<GatewayIntent, GatewayError>;

    async fn retrieve_intent(&self, intent_id: &str) -> Result<GatewayIntent, GatewayError>;

    async fn cancel_intent(&self, intent_id: &str) -> Result<GatewayIntent, GatewayError>;

    /// Every intent created for `purchase_id`, found through its metadata.
    /// Used to settle an attempt whose creation response never arrived.
    async fn purchase_intents(
        &self,
        purchase_id: Uuid,
    ) -> Result<Vec<GatewayIntent>, GatewayError>;
}

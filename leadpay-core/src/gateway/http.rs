//! HTTP client for a Stripe-compatible PaymentIntents API.
//!
//! Requests are form-encoded and authenticated with the bearer secret. Every
//! intent creation carries an `Idempotency-Key` header so a retried attempt
//! cannot charge twice.

use super::{
    GatewayCustomerMethods, GatewayError, GatewayIntent, GatewayPaymentMethod, IntentRequest,
    PaymentGateway,
};
use crate::config::GatewayConfig;
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;
use url::Url;
use uuid::Uuid;

pub struct HttpGateway {
    client: reqwest::Client,
    base_url: Url,
    secret_key: String,
}

#[derive(Deserialize)]
struct ListResponse<T> {
    data: Vec<T>,
}

#[derive(Deserialize)]
struct Customer {
    #[serde(default)]
    invoice_settings: Option<InvoiceSettings>,
}

#[derive(Deserialize)]
struct InvoiceSettings {
    #[serde(default)]
    default_payment_method: Option<String>,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorObject,
}

#[derive(Deserialize)]
struct ErrorObject {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    decline_code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl HttpGateway {
    pub fn new(config: &GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: config.base_url.clone(),
            secret_key: config.secret_key.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, GatewayError> {
        self.base_url
            .join(path)
            .map_err(|e| GatewayError::Transport(format!("invalid gateway url: {e}")))
    }

    async fn read<T: for<'de> Deserialize<'de>>(
        response: reqwest::Response,
    ) -> Result<T, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json::<T>().await?);
        }
        let body = response.text().await.unwrap_or_default();
        let error = serde_json::from_str::<ErrorEnvelope>(&body).ok().map(|e| e.error);
        Err(GatewayError::Api {
            status: status.as_u16(),
            code: error.as_ref().and_then(|e| e.code.clone()),
            decline_code: error.as_ref().and_then(|e| e.decline_code.clone()),
            message: error
                .and_then(|e| e.message)
                .unwrap_or_else(|| status.to_string()),
        })
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn customer_methods(
        &self,
        customer: &str,
    ) -> Result<GatewayCustomerMethods, GatewayError> {
        let customer = urlencoding::encode(customer);

        let response = self
            .client
            .get(self.endpoint(&format!("v1/customers/{customer}"))?)
            .bearer_auth(&self.secret_key)
            .send()
            .await?;
        let profile: Customer = Self::read(response).await?;

        let response = self
            .client
            .get(self.endpoint(&format!("v1/customers/{customer}/payment_methods"))?)
            .query(&[("type", "card")])
            .bearer_auth(&self.secret_key)
            .send()
            .await?;
        let list: ListResponse<GatewayPaymentMethod> = Self::read(response).await?;

        Ok(GatewayCustomerMethods {
            methods: list.data,
            default_method: profile
                .invoice_settings
                .and_then(|s| s.default_payment_method),
        })
    }

    async fn create_intent(&self, request: &IntentRequest) -> Result<GatewayIntent, GatewayError> {
        let mut form = vec![
            ("amount", request.amount.to_string()),
            ("currency", request.currency.to_lowercase()),
            ("customer", request.customer.clone()),
            ("metadata[purchase_id]", request.purchase_id.to_string()),
        ];
        match &request.payment_method {
            Some(method) => {
                form.push(("payment_method", method.clone()));
                form.push(("confirm", "true".to_owned()));
                form.push(("off_session", "true".to_owned()));
            }
            None => {
                form.push(("setup_future_usage", "off_session".to_owned()));
                form.push(("automatic_payment_methods[enabled]", "true".to_owned()));
            }
        }

        debug!(
            purchase_id = %request.purchase_id,
            idempotency_key = %request.idempotency_key,
            "Creating payment intent"
        );
        let response = self
            .client
            .post(self.endpoint("v1/payment_intents")?)
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", &request.idempotency_key)
            .form(&form)
            .send()
            .await?;
        Self::read(response).await
    }

    async fn retrieve_intent(&self, intent_id: &str) -> Result<GatewayIntent, GatewayError> {
        let intent_id = urlencoding::encode(intent_id);
        let response = self
            .client
            .get(self.endpoint(&format!("v1/payment_intents/{intent_id}"))?)
            .bearer_auth(&self.secret_key)
            .send()
            .await?;
        Self::read(response).await
    }

    async fn cancel_intent(&self, intent_id: &str) -> Result<GatewayIntent, GatewayError> {
        let intent_id = urlencoding::encode(intent_id);
        let response = self
            .client
            .post(self.endpoint(&format!("v1/payment_intents/{intent_id}/cancel"))?)
            .bearer_auth(&self.secret_key)
            .send()
            .await?;
        Self::read(response).await
    }

    async fn purchase_intents(
        &self,
        purchase_id: Uuid,
    ) -> Result<Vec<GatewayIntent>, GatewayError> {
        let response = self
            .client
            .get(self.endpoint("v1/payment_intents/search")?)
            .query(&[("query", format!("metadata['purchase_id']:'{purchase_id}'"))])
            .bearer_auth(&self.secret_key)
            .send()
            .await?;
        let list: ListResponse<GatewayIntent> = Self::read(response).await?;
        Ok(list.data)
    }
}

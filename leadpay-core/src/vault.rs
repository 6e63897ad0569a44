//! Stored payment methods and charging through the gateway.
//!
//! The vault owns no financial state. It turns every gateway response into a
//! [`GatewayOutcome`] or a [`VaultError`], so nothing past this module sees a
//! gateway error shape.

use crate::gateway::{GatewayError, GatewayIntent, IntentRequest, PaymentGateway};
use compact_str::CompactString;
use leadpay_sdk::objects::RetrySafety;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VaultError {
    #[error("payment method {0} is not on file for this pro")]
    UnknownPaymentMethod(String),
    #[error("payment gateway timed out")]
    NetworkTimeout,
    #[error("payment gateway unavailable: {0}")]
    Unavailable(String),
}

impl VaultError {
    pub fn retry_safety(&self) -> RetrySafety {
        match self {
            VaultError::UnknownPaymentMethod(_) => RetrySafety::AfterCorrection,
            VaultError::NetworkTimeout | VaultError::Unavailable(_) => RetrySafety::Safe,
        }
    }
}

/// Normalized result of a charge, confirmation lookup, or cancellation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayOutcome {
    Succeeded {
        reference: String,
    },
    /// The client has to finish the payment (3DS, new card entry, or async processing).
    RequiresConfirmation {
        reference: String,
        client_handle: Option<String>,
    },
    Declined {
        reference: Option<String>,
        reason: String,
    },
}

impl GatewayOutcome {
    /// Map a payment intent onto the three outcomes.
    pub fn from_intent(intent: &GatewayIntent) -> Self {
        let reference = intent.id.clone();
        match intent.status.as_str() {
            "succeeded" => GatewayOutcome::Succeeded { reference },
            "processing" | "requires_action" | "requires_confirmation" => {
                GatewayOutcome::RequiresConfirmation {
                    reference,
                    client_handle: intent.client_secret.clone(),
                }
            }
            "requires_payment_method" => match &intent.last_payment_error {
                Some(error) => GatewayOutcome::Declined {
                    reference: Some(reference),
                    reason: error
                        .decline_code
                        .clone()
                        .or_else(|| error.message.clone())
                        .or_else(|| error.code.clone())
                        .unwrap_or_else(|| "payment method declined".to_owned()),
                },
                // A fresh intent waiting for the client to enter a card.
                None => GatewayOutcome::RequiresConfirmation {
                    reference,
                    client_handle: intent.client_secret.clone(),
                },
            },
            "canceled" => GatewayOutcome::Declined {
                reference: Some(reference),
                reason: match &intent.cancellation_reason {
                    Some(why) => format!("payment canceled ({why})"),
                    None => "payment canceled".to_owned(),
                },
            },
            other => GatewayOutcome::Declined {
                reference: Some(reference),
                reason: format!("unexpected payment status {other}"),
            },
        }
    }
}

/// A stored card as shown to the pro.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentMethodRef {
    pub id: String,
    pub brand: String,
    pub last4: String,
    pub exp_month: u8,
    pub exp_year: u16,
    pub is_default: bool,
}

/// One charge attempt for a purchase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRequest {
    pub purchase_id: Uuid,
    pub pro_id: Uuid,
    pub amount: i64,
    pub idempotency_key: String,
}

/// Result of starting the new-card flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCardCharge {
    pub client_handle: Option<String>,
    pub outcome: GatewayOutcome,
}

#[derive(Clone)]
pub struct PaymentMethodVault {
    gateway: Arc<dyn PaymentGateway>,
    customer_prefix: String,
    currency: CompactString,
}

impl PaymentMethodVault {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        customer_prefix: impl Into<String>,
        currency: impl Into<CompactString>,
    ) -> Self {
        Self {
            gateway,
            customer_prefix: customer_prefix.into(),
            currency: currency.into(),
        }
    }

    /// Gateway customer id of a pro.
    pub fn customer_id(&self, pro_id: Uuid) -> String {
        format!("{}{}", self.customer_prefix, pro_id)
    }

    /// Stored cards of a pro, default first.
    pub async fn list(&self, pro_id: Uuid) -> Result<Vec<PaymentMethodRef>, VaultError> {
        let customer = self
            .gateway
            .customer_methods(&self.customer_id(pro_id))
            .await
            .map_err(lookup_error)?;

        let mut methods: Vec<PaymentMethodRef> = customer
            .methods
            .into_iter()
            .filter_map(|method| {
                let card = method.card?;
                Some(PaymentMethodRef {
                    is_default: customer.default_method.as_deref() == Some(method.id.as_str()),
                    id: method.id,
                    brand: card.brand,
                    last4: card.last4,
                    exp_month: card.exp_month,
                    exp_year: card.exp_year,
                })
            })
            .collect();
        // The gateway may list a card twice; keep one entry per id.
        let mut seen = std::collections::HashSet::new();
        methods.retain(|m| seen.insert(m.id.clone()));
        methods.sort_by_key(|m| !m.is_default);
        Ok(methods)
    }

    /// Charge a stored card off-session.
    pub async fn charge_existing(
        &self,
        request: &ChargeRequest,
        method_id: &str,
    ) -> Result<GatewayOutcome, VaultError> {
        let owned = self.list(request.pro_id).await?;
        if !owned.iter().any(|m| m.id == method_id) {
            return Err(VaultError::UnknownPaymentMethod(method_id.to_owned()));
        }
        let intent = self
            .gateway
            .create_intent(&self.intent_request(request, Some(method_id.to_owned())))
            .await;
        charge_result(intent)
    }

    /// Open an intent the client completes with a new card.
    pub async fn charge_new(&self, request: &ChargeRequest) -> Result<NewCardCharge, VaultError> {
        let intent = self
            .gateway
            .create_intent(&self.intent_request(request, None))
            .await;
        let outcome = charge_result(intent)?;
        let client_handle = match &outcome {
            GatewayOutcome::RequiresConfirmation { client_handle, .. } => client_handle.clone(),
            _ => None,
        };
        Ok(NewCardCharge {
            client_handle,
            outcome,
        })
    }

    /// Current state of an intent.
    pub async fn retrieve(&self, reference: &str) -> Result<GatewayOutcome, VaultError> {
        let intent = self
            .gateway
            .retrieve_intent(reference)
            .await
            .map_err(lookup_error)?;
        Ok(GatewayOutcome::from_intent(&intent))
    }

    /// Cancel an unconsumed intent. When the gateway refuses because the
    /// intent already completed, the completed state is returned instead.
    pub async fn cancel(&self, reference: &str) -> Result<GatewayOutcome, VaultError> {
        match self.gateway.cancel_intent(reference).await {
            Ok(intent) => Ok(GatewayOutcome::from_intent(&intent)),
            Err(GatewayError::Api { status, code, .. }) if (400..500).contains(&status) => {
                debug!(reference, code = ?code, "Intent not cancellable, reading its state");
                self.retrieve(reference).await
            }
            Err(e) => Err(lookup_error(e)),
        }
    }

    /// Close every attempt made for `purchase_id`: cancel the intents still
    /// open and return the reference of one that already charged, if any.
    pub async fn settle_open_attempts(
        &self,
        purchase_id: Uuid,
    ) -> Result<Option<String>, VaultError> {
        self.find_charge(purchase_id, true).await
    }

    /// Reference of an attempt for `purchase_id` that already charged. Open
    /// attempts are left alone.
    pub async fn charged_attempt(&self, purchase_id: Uuid) -> Result<Option<String>, VaultError> {
        self.find_charge(purchase_id, false).await
    }

    async fn find_charge(
        &self,
        purchase_id: Uuid,
        cancel_open: bool,
    ) -> Result<Option<String>, VaultError> {
        let intents = self
            .gateway
            .purchase_intents(purchase_id)
            .await
            .map_err(lookup_error)?;
        let mut charged = None;
        for intent in &intents {
            let outcome = match GatewayOutcome::from_intent(intent) {
                GatewayOutcome::RequiresConfirmation { reference, .. } if cancel_open => {
                    self.cancel(&reference).await?
                }
                other => other,
            };
            if let GatewayOutcome::Succeeded { reference } = outcome {
                charged.get_or_insert(reference);
            }
        }
        debug!(
            %purchase_id,
            attempts = intents.len(),
            charged = ?charged,
            "Looked up purchase attempts"
        );
        Ok(charged)
    }

    fn intent_request(&self, request: &ChargeRequest, method: Option<String>) -> IntentRequest {
        IntentRequest {
            purchase_id: request.purchase_id,
            customer: self.customer_id(request.pro_id),
            amount: request.amount,
            currency: self.currency.to_string(),
            payment_method: method,
            idempotency_key: request.idempotency_key.clone(),
        }
    }
}

fn charge_result(
    intent: Result<GatewayIntent, GatewayError>,
) -> Result<GatewayOutcome, VaultError> {
    match intent {
        Ok(intent) => Ok(GatewayOutcome::from_intent(&intent)),
        Err(GatewayError::Timeout) => Err(VaultError::NetworkTimeout),
        Err(GatewayError::Api { status, .. })
            if status == 409 || status == 429 || status >= 500 =>
        {
            Err(VaultError::Unavailable(format!("gateway returned {status}")))
        }
        Err(GatewayError::Api {
            decline_code,
            message,
            ..
        }) => Ok(GatewayOutcome::Declined {
            reference: None,
            reason: decline_code.unwrap_or(message),
        }),
        Err(e @ (GatewayError::Transport(_) | GatewayError::Decode(_))) => {
            warn!(error = %e, "Gateway charge failed");
            Err(VaultError::Unavailable(e.to_string()))
        }
    }
}

fn lookup_error(e: GatewayError) -> VaultError {
    match e {
        GatewayError::Timeout => VaultError::NetworkTimeout,
        other => VaultError::Unavailable(other.to_string()),
    }
}

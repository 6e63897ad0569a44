//! The purchase state machine.
//!
//! `Pending` is only ever visible inside the store transaction that opens a
//! purchase. From there a purchase waits for a payment method, optionally for
//! gateway confirmation, and ends `Succeeded` or `Failed`. A succeeded purchase
//! may later become `Refunded` through the refund scheduler.
//!
//! Gateway calls happen outside any store transaction. A charge is claimed by
//! a versioned write that sets `charge_in_flight` before the call, so two
//! concurrent selections for one purchase cannot both reach the gateway.

mod error;
mod funding;

pub use error::PurchaseError;
pub use funding::FundingPlan;

use crate::config::{ConfigStore, PurchasePolicy};
use crate::entities::{NewPurchase, Purchase, PurchaseStatus};
use crate::events::{LeadEvent, LeadEventSender, emit};
use crate::pricing::PriceBreakdown;
use crate::store::{PurchaseEffect, SharedStore, StoreError};
use crate::vault::{ChargeRequest, GatewayOutcome, PaymentMethodVault, VaultError};
use leadpay_sdk::objects::NEW_PAYMENT_METHOD;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Purchases handled per reaper sweep.
const REAP_BATCH: usize = 100;

/// What the pro picked in the payment step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentChoice {
    Stored(String),
    NewCard,
}

impl PaymentChoice {
    pub fn parse(raw: &str) -> Self {
        if raw == NEW_PAYMENT_METHOD {
            PaymentChoice::NewCard
        } else {
            PaymentChoice::Stored(raw.to_owned())
        }
    }
}

/// Outcome the client reports after finishing a gateway confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationResult {
    Succeeded,
    Failed { reason: Option<String> },
}

/// Result of a payment step: the purchase plus the handle the client needs
/// to finish a confirmation, if one is required.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentStep {
    pub purchase: Purchase,
    pub client_handle: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReapReport {
    /// Timed out confirmations moved to `Failed`.
    pub failed: Vec<Uuid>,
    /// Timed out confirmations and stale claims whose charge had succeeded.
    pub succeeded: Vec<Uuid>,
    /// Charges whose in-flight claim was released.
    pub released: Vec<Uuid>,
}

impl ReapReport {
    pub fn is_empty(&self) -> bool {
        self.failed.is_empty() && self.succeeded.is_empty() && self.released.is_empty()
    }
}

#[derive(Clone)]
pub struct PurchaseOrchestrator {
    store: SharedStore,
    vault: PaymentMethodVault,
    policy: ConfigStore<PurchasePolicy>,
    events: LeadEventSender,
}

impl PurchaseOrchestrator {
    pub fn new(
        store: SharedStore,
        vault: PaymentMethodVault,
        policy: ConfigStore<PurchasePolicy>,
        events: LeadEventSender,
    ) -> Self {
        Self {
            store,
            vault,
            policy,
            events,
        }
    }

    /// Open a purchase and pay as much of it as possible from the balance.
    pub async fn begin(
        &self,
        job_id: Uuid,
        pro_id: Uuid,
        breakdown: PriceBreakdown,
    ) -> Result<Purchase, PurchaseError> {
        if breakdown.final_price <= 0 {
            return Err(PurchaseError::InvalidAmount(breakdown.final_price));
        }
        let policy = *self.policy.read().await;
        let new = NewPurchase {
            id: Uuid::now_v7(),
            job_id,
            pro_id,
            price_breakdown: breakdown,
        };
        let purchase = self
            .store
            .open_purchase(
                new,
                policy.coverage,
                policy.refund_window,
                OffsetDateTime::now_utc(),
            )
            .await?;

        info!(
            purchase_id = %purchase.id,
            job_id = %job_id,
            pro_id = %pro_id,
            status = %purchase.status,
            from_balance = purchase.amount_from_balance,
            from_gateway = purchase.amount_from_gateway,
            "Purchase opened"
        );
        if purchase.status == PurchaseStatus::Succeeded {
            self.unlocked(&purchase);
        }
        Ok(purchase)
    }

    pub async fn get(&self, purchase_id: Uuid) -> Result<Purchase, PurchaseError> {
        self.store
            .purchase(purchase_id)
            .await?
            .ok_or(PurchaseError::PurchaseNotFound(purchase_id))
    }

    pub async fn find_active(
        &self,
        job_id: Uuid,
        pro_id: Uuid,
    ) -> Result<Option<Purchase>, PurchaseError> {
        Ok(self.store.active_purchase(job_id, pro_id).await?)
    }

    /// Charge the gateway portion to a stored card or start the new-card flow.
    pub async fn select_payment_method(
        &self,
        purchase_id: Uuid,
        choice: PaymentChoice,
    ) -> Result<PaymentStep, PurchaseError> {
        let policy = *self.policy.read().await;
        let purchase = self.get(purchase_id).await?;
        if purchase.status != PurchaseStatus::AwaitingPaymentMethod {
            return Err(invalid_transition(&purchase, "select a payment method for"));
        }
        if purchase.charge_in_flight {
            return Err(PurchaseError::ChargeInProgress(purchase_id));
        }

        // A timed out attempt is retried under its own key so the gateway
        // can deduplicate a charge that did go through.
        let attempt = if purchase.last_attempt_timed_out {
            purchase.gateway_attempts
        } else {
            purchase.gateway_attempts + 1
        };
        let mut claim = purchase.clone();
        claim.gateway_attempts = attempt;
        claim.timeout_retries =
            purchase.timeout_retries + i32::from(purchase.last_attempt_timed_out);
        claim.charge_in_flight = true;
        // Retries of a timed out attempt count against the limit as well.
        let tries = attempt_count(claim.gateway_tries());
        if tries > policy.max_gateway_attempts {
            let settled = self
                .settle_then_fail(purchase, "gateway attempts exhausted".to_owned())
                .await?;
            if settled.status == PurchaseStatus::Succeeded {
                return Ok(PaymentStep {
                    purchase: settled,
                    client_handle: None,
                });
            }
            return Err(PurchaseError::AttemptsExhausted {
                reason: settled.failure_reason.unwrap_or_default(),
            });
        }

        let claimed = self
            .store
            .update_purchase(&claim, PurchaseEffect::None, OffsetDateTime::now_utc())
            .await?;

        let request = ChargeRequest {
            purchase_id,
            pro_id: claimed.pro_id,
            amount: claimed.amount_from_gateway,
            idempotency_key: claimed.idempotency_key(attempt),
        };
        debug!(
            purchase_id = %purchase_id,
            attempt = attempt,
            tries = tries,
            amount = request.amount,
            "Charging gateway portion"
        );
        let charged = match &choice {
            PaymentChoice::Stored(method_id) => {
                self.vault.charge_existing(&request, method_id).await
            }
            PaymentChoice::NewCard => self.vault.charge_new(&request).await.map(|c| c.outcome),
        };

        match charged {
            Ok(GatewayOutcome::Succeeded { reference }) => {
                let purchase = self.succeed(claimed, reference).await?;
                Ok(PaymentStep {
                    purchase,
                    client_handle: None,
                })
            }
            Ok(GatewayOutcome::RequiresConfirmation {
                reference,
                client_handle,
            }) => {
                let mut awaiting = claimed;
                let now = OffsetDateTime::now_utc();
                awaiting.status = PurchaseStatus::AwaitingGatewayConfirmation;
                awaiting.gateway_reference = Some(reference);
                awaiting.client_secret = client_handle.clone();
                awaiting.awaiting_since = Some(now);
                awaiting.charge_in_flight = false;
                awaiting.last_attempt_timed_out = false;
                let purchase = self
                    .store
                    .update_purchase(&awaiting, PurchaseEffect::None, now)
                    .await?;
                info!(purchase_id = %purchase_id, "Purchase awaits gateway confirmation");
                Ok(PaymentStep {
                    purchase,
                    client_handle,
                })
            }
            Ok(GatewayOutcome::Declined { reason, .. }) => {
                let max = policy.max_gateway_attempts;
                if tries >= max {
                    let mut exhausted = claimed;
                    exhausted.charge_in_flight = false;
                    self.fail(exhausted, format!("declined: {reason}")).await?;
                    return Err(PurchaseError::AttemptsExhausted { reason });
                }
                let mut released = claimed;
                released.charge_in_flight = false;
                released.last_attempt_timed_out = false;
                self.store
                    .update_purchase(&released, PurchaseEffect::None, OffsetDateTime::now_utc())
                    .await?;
                info!(purchase_id = %purchase_id, reason = %reason, "Gateway declined charge");
                Err(PurchaseError::Declined {
                    reason,
                    attempts_left: max.saturating_sub(tries),
                })
            }
            Err(e) => {
                let mut released = claimed;
                released.charge_in_flight = false;
                match &e {
                    // Never reached the gateway; the attempt does not count.
                    VaultError::UnknownPaymentMethod(_) => {
                        released.gateway_attempts = purchase.gateway_attempts;
                        released.timeout_retries = purchase.timeout_retries;
                    }
                    VaultError::NetworkTimeout | VaultError::Unavailable(_) => {
                        released.last_attempt_timed_out = true;
                    }
                }
                if let Err(store_error) = self
                    .store
                    .update_purchase(&released, PurchaseEffect::None, OffsetDateTime::now_utc())
                    .await
                {
                    // The reaper releases the claim later.
                    error!(
                        purchase_id = %purchase_id,
                        error = %store_error,
                        "Failed to release charge claim"
                    );
                }
                warn!(purchase_id = %purchase_id, error = %e, "Gateway charge did not complete");
                Err(e.into())
            }
        }
    }

    /// Settle a confirmation the client reports as finished, checking the
    /// gateway's own view of the intent first.
    pub async fn confirm_gateway(
        &self,
        purchase_id: Uuid,
        reported: ConfirmationResult,
    ) -> Result<Purchase, PurchaseError> {
        let purchase = self.get(purchase_id).await?;
        match (&reported, purchase.status) {
            (ConfirmationResult::Succeeded, status) if status.is_paid() => return Ok(purchase),
            (ConfirmationResult::Succeeded, PurchaseStatus::Refunded) => return Ok(purchase),
            (ConfirmationResult::Failed { .. }, PurchaseStatus::Failed) => return Ok(purchase),
            (_, PurchaseStatus::AwaitingGatewayConfirmation) => {}
            _ => return Err(invalid_transition(&purchase, "confirm")),
        }
        let Some(reference) = purchase.gateway_reference.clone() else {
            return Err(invalid_transition(&purchase, "confirm"));
        };

        match self.vault.retrieve(&reference).await? {
            GatewayOutcome::Succeeded { reference } => {
                if let ConfirmationResult::Failed { reason } = &reported {
                    warn!(
                        purchase_id = %purchase_id,
                        reported = ?reason,
                        "Client reported failure but gateway charge succeeded"
                    );
                }
                self.succeed(purchase, reference).await
            }
            GatewayOutcome::Declined { reason, .. } => {
                self.fail(purchase, format!("declined: {reason}")).await
            }
            GatewayOutcome::RequiresConfirmation { .. } => match reported {
                ConfirmationResult::Succeeded => {
                    Err(PurchaseError::ConfirmationPending(purchase_id))
                }
                ConfirmationResult::Failed { reason } => {
                    let reason = reason.unwrap_or_else(|| "confirmation failed".to_owned());
                    self.cancel_then_fail(purchase, &reference, reason).await
                }
            },
        }
    }

    /// Apply an outcome the gateway pushed through its webhook.
    ///
    /// A success is accepted for any intent of a purchase still waiting on the
    /// gateway, including one whose local write was lost after the charge. A
    /// success for a purchase that already failed is credited to the balance.
    /// Failures only count for the intent the purchase currently tracks.
    pub async fn apply_gateway_outcome(
        &self,
        purchase_id: Uuid,
        outcome: GatewayOutcome,
    ) -> Result<Purchase, PurchaseError> {
        let purchase = self.get(purchase_id).await?;
        let waiting = matches!(
            purchase.status,
            PurchaseStatus::AwaitingPaymentMethod | PurchaseStatus::AwaitingGatewayConfirmation
        );
        match outcome {
            GatewayOutcome::Succeeded { reference } if waiting => {
                self.succeed(purchase, reference).await
            }
            GatewayOutcome::Succeeded { reference }
                if purchase.status == PurchaseStatus::Failed && purchase.amount_from_gateway > 0 =>
            {
                self.credit_late_charge(purchase, reference).await
            }
            GatewayOutcome::Succeeded { reference } => {
                if purchase.gateway_reference.as_deref() != Some(reference.as_str()) {
                    error!(
                        purchase_id = %purchase_id,
                        status = %purchase.status,
                        reference = %reference,
                        "Gateway charge succeeded for a purchase that is no longer waiting on it"
                    );
                }
                Ok(purchase)
            }
            GatewayOutcome::Declined { reference, reason }
                if purchase.status == PurchaseStatus::AwaitingGatewayConfirmation
                    && reference.is_some()
                    && purchase.gateway_reference == reference =>
            {
                self.fail(purchase, format!("declined: {reason}")).await
            }
            other => {
                debug!(
                    purchase_id = %purchase_id,
                    status = %purchase.status,
                    outcome = ?other,
                    "Ignoring gateway outcome"
                );
                Ok(purchase)
            }
        }
    }

    /// Cancel the open gateway intent and go back to payment-method selection.
    pub async fn return_to_payment_method(
        &self,
        purchase_id: Uuid,
    ) -> Result<Purchase, PurchaseError> {
        let purchase = self.get(purchase_id).await?;
        if purchase.status != PurchaseStatus::AwaitingGatewayConfirmation {
            return Err(invalid_transition(&purchase, "return to payment selection from"));
        }
        if let Some(reference) = purchase.gateway_reference.clone()
            && let GatewayOutcome::Succeeded { reference } = self.vault.cancel(&reference).await?
        {
            // Paid before the pro navigated away.
            return self.succeed(purchase, reference).await;
        }

        let mut back = purchase;
        back.status = PurchaseStatus::AwaitingPaymentMethod;
        back.gateway_reference = None;
        back.client_secret = None;
        back.awaiting_since = None;
        let purchase = self
            .store
            .update_purchase(&back, PurchaseEffect::None, OffsetDateTime::now_utc())
            .await?;
        info!(purchase_id = %purchase_id, "Returned to payment method selection");
        Ok(purchase)
    }

    /// The pro gives up on the purchase.
    pub async fn abandon(&self, purchase_id: Uuid) -> Result<Purchase, PurchaseError> {
        let purchase = self.get(purchase_id).await?;
        match purchase.status {
            PurchaseStatus::AwaitingPaymentMethod if purchase.charge_in_flight => {
                Err(PurchaseError::ChargeInProgress(purchase_id))
            }
            PurchaseStatus::AwaitingPaymentMethod => {
                self.settle_then_fail(purchase, "abandoned by pro".to_owned())
                    .await
            }
            PurchaseStatus::AwaitingGatewayConfirmation => {
                let Some(reference) = purchase.gateway_reference.clone() else {
                    return self.fail(purchase, "abandoned by pro".to_owned()).await;
                };
                self.cancel_then_fail(purchase, &reference, "abandoned by pro".to_owned())
                    .await
            }
            _ => Err(invalid_transition(&purchase, "abandon")),
        }
    }

    /// Fail confirmations that waited longer than the policy allows and
    /// release charge claims whose holder never came back.
    pub async fn reap_stuck(&self, now: OffsetDateTime) -> Result<ReapReport, PurchaseError> {
        let policy = *self.policy.read().await;
        let cutoff = now - policy.confirmation_timeout;
        let mut report = ReapReport::default();

        let stuck = self
            .store
            .stale_purchases(
                PurchaseStatus::AwaitingGatewayConfirmation,
                cutoff,
                None,
                REAP_BATCH,
            )
            .await?;
        for purchase in stuck {
            if purchase.awaiting_since.is_some_and(|since| since >= cutoff) {
                continue;
            }
            let id = purchase.id;
            let result = match purchase.gateway_reference.clone() {
                Some(reference) => match self.vault.cancel(&reference).await {
                    Ok(GatewayOutcome::Succeeded { reference }) => self
                        .succeed(purchase, reference)
                        .await
                        .map(|_| report.succeeded.push(id)),
                    Ok(_) => self
                        .fail(purchase, "gateway confirmation timed out".to_owned())
                        .await
                        .map(|_| report.failed.push(id)),
                    Err(e) => {
                        warn!(
                            purchase_id = %id,
                            error = %e,
                            "Could not cancel stuck intent, retrying next sweep"
                        );
                        continue;
                    }
                },
                None => self
                    .fail(purchase, "gateway confirmation timed out".to_owned())
                    .await
                    .map(|_| report.failed.push(id)),
            };
            if let Err(e) = result {
                warn!(purchase_id = %id, error = %e, "Failed to reap stuck purchase");
            }
        }

        let claimed = self
            .store
            .stale_purchases(
                PurchaseStatus::AwaitingPaymentMethod,
                cutoff,
                Some(true),
                REAP_BATCH,
            )
            .await?;
        for mut purchase in claimed {
            let id = purchase.id;
            match self.vault.charged_attempt(id).await {
                Ok(Some(reference)) => {
                    match self.succeed(purchase, reference).await {
                        Ok(_) => report.succeeded.push(id),
                        Err(e) => {
                            warn!(purchase_id = %id, error = %e, "Failed to settle stale charge")
                        }
                    }
                    continue;
                }
                Ok(None) => {}
                Err(e) => warn!(purchase_id = %id, error = %e, "Could not look up stale charge"),
            }
            // The next selection retries under the same key.
            purchase.charge_in_flight = false;
            purchase.last_attempt_timed_out = true;
            match self
                .store
                .update_purchase(&purchase, PurchaseEffect::None, now)
                .await
            {
                Ok(_) => report.released.push(id),
                Err(e) => warn!(purchase_id = %id, error = %e, "Failed to release charge claim"),
            }
        }

        if !report.is_empty() {
            info!(
                failed = report.failed.len(),
                succeeded = report.succeeded.len(),
                released = report.released.len(),
                "Reaped stuck purchases"
            );
        }
        Ok(report)
    }

    /// Fail `purchase` unless its unanswered last attempt turns out to have
    /// charged. Attempts still open at the gateway are cancelled first.
    async fn settle_then_fail(
        &self,
        purchase: Purchase,
        reason: String,
    ) -> Result<Purchase, PurchaseError> {
        if purchase.last_attempt_timed_out
            && let Some(reference) = self.vault.settle_open_attempts(purchase.id).await?
        {
            info!(
                purchase_id = %purchase.id,
                reference = %reference,
                "Timed out attempt had charged"
            );
            return self.succeed(purchase, reference).await;
        }
        self.fail(purchase, reason).await
    }

    async fn cancel_then_fail(
        &self,
        purchase: Purchase,
        reference: &str,
        reason: String,
    ) -> Result<Purchase, PurchaseError> {
        match self.vault.cancel(reference).await? {
            GatewayOutcome::Succeeded { reference } => self.succeed(purchase, reference).await,
            _ => self.fail(purchase, reason).await,
        }
    }

    /// Move to `Succeeded` and arm the money-back timer in the same write.
    async fn succeed(
        &self,
        mut purchase: Purchase,
        reference: String,
    ) -> Result<Purchase, PurchaseError> {
        let policy = *self.policy.read().await;
        let now = OffsetDateTime::now_utc();
        purchase.status = PurchaseStatus::Succeeded;
        purchase.gateway_reference = Some(reference.clone());
        purchase.client_secret = None;
        purchase.charge_in_flight = false;
        purchase.last_attempt_timed_out = false;
        purchase.awaiting_since = None;
        let effect = PurchaseEffect::ArmRefundTimer {
            deadline: now + policy.refund_window,
        };
        let purchase = match self.store.update_purchase(&purchase, effect, now).await {
            Ok(purchase) => purchase,
            Err(StoreError::VersionConflict(id)) => {
                // The webhook may have settled this charge while the caller
                // was still waiting on the gateway.
                let current = self.get(id).await?;
                let settled =
                    current.status.is_paid() || current.status == PurchaseStatus::Refunded;
                if settled && current.gateway_reference.as_deref() == Some(reference.as_str()) {
                    debug!(purchase_id = %id, reference = %reference, "Charge already settled");
                    return Ok(current);
                }
                return Err(PurchaseError::ConcurrentModification(id));
            }
            Err(e) => return Err(e.into()),
        };
        info!(
            purchase_id = %purchase.id,
            amount = purchase.amount_charged(),
            "Purchase succeeded"
        );
        self.unlocked(&purchase);
        Ok(purchase)
    }

    /// Credit a charge that landed after the purchase failed. At most one
    /// late charge is credited per purchase.
    async fn credit_late_charge(
        &self,
        purchase: Purchase,
        reference: String,
    ) -> Result<Purchase, PurchaseError> {
        let id = purchase.id;
        let mut credited = purchase;
        credited.gateway_reference = Some(reference.clone());
        match self
            .store
            .update_purchase(
                &credited,
                PurchaseEffect::CreditLateCharge,
                OffsetDateTime::now_utc(),
            )
            .await
        {
            Ok(purchase) => {
                warn!(
                    purchase_id = %id,
                    reference = %reference,
                    amount = purchase.amount_from_gateway,
                    "Gateway charged a failed purchase, credited to balance"
                );
                Ok(purchase)
            }
            Err(StoreError::DuplicateSettlement { .. }) => {
                let current = self.get(id).await?;
                if current.gateway_reference.as_deref() == Some(reference.as_str()) {
                    debug!(
                        purchase_id = %id,
                        reference = %reference,
                        "Late charge already credited"
                    );
                } else {
                    error!(
                        purchase_id = %id,
                        reference = %reference,
                        credited = ?current.gateway_reference,
                        "Second late charge for a failed purchase was not credited"
                    );
                }
                Ok(current)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Move to `Failed` and credit the balance portion back in the same write.
    async fn fail(
        &self,
        mut purchase: Purchase,
        reason: String,
    ) -> Result<Purchase, PurchaseError> {
        purchase.status = PurchaseStatus::Failed;
        purchase.failure_reason = Some(reason.clone());
        purchase.client_secret = None;
        purchase.charge_in_flight = false;
        purchase.awaiting_since = None;
        let purchase = self
            .store
            .update_purchase(
                &purchase,
                PurchaseEffect::CompensateBalance,
                OffsetDateTime::now_utc(),
            )
            .await?;
        info!(
            purchase_id = %purchase.id,
            reason = %reason,
            compensated = purchase.amount_from_balance,
            "Purchase failed"
        );
        emit(
            &self.events,
            LeadEvent::PurchaseFailed {
                purchase_id: purchase.id,
                job_id: purchase.job_id,
                pro_id: purchase.pro_id,
                reason,
            },
        );
        Ok(purchase)
    }

    fn unlocked(&self, purchase: &Purchase) {
        emit(
            &self.events,
            LeadEvent::LeadUnlocked {
                purchase_id: purchase.id,
                job_id: purchase.job_id,
                pro_id: purchase.pro_id,
                amount: purchase.amount_charged(),
            },
        );
    }
}

fn invalid_transition(purchase: &Purchase, operation: &'static str) -> PurchaseError {
    PurchaseError::InvalidTransition {
        purchase_id: purchase.id,
        status: purchase.status,
        operation,
    }
}

fn attempt_count(attempt: i32) -> u32 {
    u32::try_from(attempt).unwrap_or(0)
}

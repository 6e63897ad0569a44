//! RefundGuaranteeScheduler.
//!
//! Every successful purchase carries a money-back timer. If the customer
//! responds before the deadline the timer is cancelled; otherwise the sweep
//! fires it and credits the full charge back to the pro.
//!
//! A sweep:
//! - retries fired timers whose refund was never written (an earlier
//!   failure or a crash between firing and settling)
//! - fires each due timer with a compare-and-set on `fired`, then writes the
//!   refund credit, the `Refunded` transition and `settled_at` together
//! - moves the purchase to `RefundPending` when that write fails, so the
//!   next sweep picks it up again

use crate::config::{ConfigStore, RefundPolicy};
use crate::entities::{LedgerReason, PurchaseStatus, RefundTimer};
use crate::events::{LeadEvent, LeadEventSender, emit};
use crate::store::{PurchaseEffect, SharedStore, StoreError};
use leadpay_sdk::objects::{RefundTimerState, RetrySafety};
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("purchase not found: {0}")]
    PurchaseNotFound(Uuid),

    /// A refund that must never happen was about to.
    #[error("consistency violation on purchase {purchase_id}: {detail}")]
    ConsistencyViolation { purchase_id: Uuid, detail: String },
}

impl SchedulerError {
    pub fn retry_safety(&self) -> RetrySafety {
        match self {
            SchedulerError::Store(_) => RetrySafety::Safe,
            SchedulerError::PurchaseNotFound(_) | SchedulerError::ConsistencyViolation { .. } => {
                RetrySafety::Never
            }
        }
    }
}

/// Result of cancelling a money-back timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerCancellation {
    Cancelled,
    AlreadyCancelled,
    AlreadyFired,
    NotArmed,
}

impl From<TimerCancellation> for RefundTimerState {
    fn from(value: TimerCancellation) -> Self {
        match value {
            TimerCancellation::Cancelled => RefundTimerState::Cancelled,
            TimerCancellation::AlreadyCancelled => RefundTimerState::AlreadyCancelled,
            TimerCancellation::AlreadyFired => RefundTimerState::AlreadyFired,
            TimerCancellation::NotArmed => RefundTimerState::NotArmed,
        }
    }
}

/// How one settle call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Settlement {
    Refunded,
    /// Another sweep wrote the refund first.
    AlreadySettled,
}

#[derive(Clone)]
pub struct RefundGuaranteeScheduler {
    store: SharedStore,
    policy: ConfigStore<RefundPolicy>,
    events: LeadEventSender,
}

impl RefundGuaranteeScheduler {
    pub fn new(
        store: SharedStore,
        policy: ConfigStore<RefundPolicy>,
        events: LeadEventSender,
    ) -> Self {
        Self {
            store,
            policy,
            events,
        }
    }

    /// Arm a timer for `purchase_id`. Returns `false` if it already had one.
    pub async fn arm(
        &self,
        purchase_id: Uuid,
        deadline: OffsetDateTime,
    ) -> Result<bool, SchedulerError> {
        let timer = RefundTimer::armed(purchase_id, OffsetDateTime::now_utc(), deadline);
        Ok(self.store.arm_timer(timer).await?)
    }

    /// The customer responded: the guarantee no longer applies.
    pub async fn cancel(&self, purchase_id: Uuid) -> Result<TimerCancellation, SchedulerError> {
        if self
            .store
            .cancel_timer(purchase_id, OffsetDateTime::now_utc())
            .await?
        {
            info!(purchase_id = %purchase_id, "Refund timer cancelled");
            return Ok(TimerCancellation::Cancelled);
        }
        Ok(match self.store.timer(purchase_id).await? {
            None => TimerCancellation::NotArmed,
            Some(timer) if timer.fired => TimerCancellation::AlreadyFired,
            Some(_) => TimerCancellation::AlreadyCancelled,
        })
    }

    /// Run one sweep. Returns the purchases refunded by it.
    pub async fn fire_due(&self, now: OffsetDateTime) -> Result<Vec<Uuid>, SchedulerError> {
        let batch = self.policy.read().await.batch_size;
        let mut refunded = Vec::new();

        for timer in self.store.unsettled_timers(batch).await? {
            match self.settle(timer.purchase_id, now).await {
                Ok(Settlement::Refunded) => refunded.push(timer.purchase_id),
                Ok(Settlement::AlreadySettled) => {}
                Err(e) => {
                    warn!(purchase_id = %timer.purchase_id, error = %e, "Refund retry failed")
                }
            }
        }

        for timer in self.store.due_timers(now, batch).await? {
            let purchase_id = timer.purchase_id;
            if !self.store.mark_timer_fired(purchase_id, now).await? {
                // Cancelled or fired by someone else in the meantime.
                continue;
            }
            info!(purchase_id = %purchase_id, deadline = %timer.deadline, "Refund timer fired");
            match self.settle(purchase_id, now).await {
                Ok(Settlement::Refunded) => refunded.push(purchase_id),
                Ok(Settlement::AlreadySettled) => {}
                Err(e) => {
                    warn!(purchase_id = %purchase_id, error = %e, "Refund failed, marking pending");
                    self.mark_refund_pending(purchase_id, now).await;
                }
            }
        }

        Ok(refunded)
    }

    /// Credit the charge back and mark the purchase `Refunded`.
    async fn settle(
        &self,
        purchase_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<Settlement, SchedulerError> {
        let purchase = self
            .store
            .purchase(purchase_id)
            .await?
            .ok_or(SchedulerError::PurchaseNotFound(purchase_id))?;

        if purchase.status == PurchaseStatus::Refunded && self.refund_recorded(purchase_id).await? {
            debug!(purchase_id = %purchase_id, "Refund already settled by another sweep");
            return Ok(Settlement::AlreadySettled);
        }
        if !purchase.status.is_paid() {
            return Err(violation(
                purchase_id,
                format!("refund of a purchase in status {}", purchase.status),
            ));
        }
        let amount = purchase.amount_charged();
        if amount <= 0 {
            return Err(violation(
                purchase_id,
                "refund of a purchase that charged nothing".into(),
            ));
        }

        let mut refunded = purchase;
        refunded.status = PurchaseStatus::Refunded;
        let refunded = match self
            .store
            .update_purchase(&refunded, PurchaseEffect::SettleRefund, now)
            .await
        {
            Ok(refunded) => refunded,
            Err(
                e @ (StoreError::VersionConflict(_)
                | StoreError::DuplicateSettlement {
                    reason: LedgerReason::MoneyBackRefund,
                    ..
                }),
            ) => {
                if self.refund_recorded(purchase_id).await? {
                    debug!(purchase_id = %purchase_id, "Refund settled concurrently");
                    return Ok(Settlement::AlreadySettled);
                }
                return Err(match e {
                    StoreError::DuplicateSettlement { .. } => {
                        violation(purchase_id, "second refund for the same purchase".into())
                    }
                    other => other.into(),
                });
            }
            Err(e) => return Err(e.into()),
        };

        info!(purchase_id = %purchase_id, amount = amount, "Money-back refund credited");
        emit(
            &self.events,
            LeadEvent::LeadRefunded {
                purchase_id,
                job_id: refunded.job_id,
                pro_id: refunded.pro_id,
                amount,
            },
        );
        Ok(Settlement::Refunded)
    }

    /// The purchase is `Refunded` and its timer settled, i.e. the refund
    /// credit is written.
    async fn refund_recorded(&self, purchase_id: Uuid) -> Result<bool, SchedulerError> {
        let refunded = self
            .store
            .purchase(purchase_id)
            .await?
            .is_some_and(|p| p.status == PurchaseStatus::Refunded);
        let settled = self
            .store
            .timer(purchase_id)
            .await?
            .is_some_and(|t| t.settled_at.is_some());
        Ok(refunded && settled)
    }

    async fn mark_refund_pending(&self, purchase_id: Uuid, now: OffsetDateTime) {
        let result = async {
            let Some(mut purchase) = self.store.purchase(purchase_id).await? else {
                return Ok(());
            };
            if purchase.status == PurchaseStatus::Succeeded {
                purchase.status = PurchaseStatus::RefundPending;
                self.store
                    .update_purchase(&purchase, PurchaseEffect::None, now)
                    .await?;
            }
            Ok::<_, StoreError>(())
        }
        .await;
        // The fired timer stays unsettled either way, so the refund is retried.
        if let Err(e) = result {
            error!(purchase_id = %purchase_id, error = %e, "Failed to mark refund pending");
        }
    }

    /// Sweep on the configured interval until shutdown.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        info!("RefundGuaranteeScheduler started");

        loop {
            let interval = self.policy.read().await.sweep_interval;
            tokio::select! {
                biased;

                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("RefundGuaranteeScheduler received shutdown signal");
                        break;
                    }
                }

                _ = tokio::time::sleep(interval) => {
                    match self.fire_due(OffsetDateTime::now_utc()).await {
                        Ok(refunded) if !refunded.is_empty() => {
                            info!(count = refunded.len(), "Refund sweep completed");
                        }
                        Ok(_) => {}
                        Err(e) => error!(error = %e, "Refund sweep failed"),
                    }
                }
            }
        }

        info!("RefundGuaranteeScheduler shutdown complete");
    }
}

fn violation(purchase_id: Uuid, detail: String) -> SchedulerError {
    error!(purchase_id = %purchase_id, detail = %detail, "Refund invariant violated");
    SchedulerError::ConsistencyViolation {
        purchase_id,
        detail,
    }
}

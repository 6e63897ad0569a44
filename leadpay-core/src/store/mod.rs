//! Persistence ports.
//!
//! Every component talks to storage through these traits so the same logic
//! runs against Postgres in production and the in-memory adapter in tests and
//! demo runs. All coordination between concurrent calls happens here: the
//! one-active-purchase rule, the non-negative balance, and the versioned
//! purchase writes are enforced atomically by each adapter.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::config::CoveragePolicy;
use crate::entities::{
    LedgerEntry, LedgerReason, NewLedgerEntry, NewPurchase, Purchase, PurchaseStatus, RefundTimer,
};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("purchase {existing} is already active for this job and pro")]
    DuplicateActivePurchase { existing: Uuid },

    #[error("insufficient balance: {available} available, {required} required")]
    InsufficientBalance { available: i64, required: i64 },

    #[error("ledger amounts must be positive, got {0}")]
    InvalidAmount(i64),

    #[error("purchase {0} was modified concurrently")]
    VersionConflict(Uuid),

    #[error("purchase not found: {0}")]
    PurchaseNotFound(Uuid),

    #[error("a {reason} entry already exists for purchase {purchase_id}")]
    DuplicateSettlement {
        purchase_id: Uuid,
        reason: LedgerReason,
    },

    #[error("refund timer of purchase {0} has not fired or is already settled")]
    TimerNotFired(Uuid),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Side effect committed atomically with a purchase update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurchaseEffect {
    None,
    /// Credit `amount_from_balance` back as `purchase_compensation`, if non-zero.
    CompensateBalance,
    /// Arm the money-back timer.
    ArmRefundTimer { deadline: OffsetDateTime },
    /// Credit `amount_charged` back as `money_back_refund` and settle the
    /// already fired timer.
    SettleRefund,
    /// Credit `amount_from_gateway` as `late_charge_credit`, referencing the
    /// gateway charge that landed after the purchase failed.
    CreditLateCharge,
}

impl PurchaseEffect {
    /// The ledger entry this effect appends for `purchase`, if any.
    pub fn ledger_entry(self, purchase: &Purchase) -> Option<NewLedgerEntry> {
        let (amount, reason) = match self {
            PurchaseEffect::CompensateBalance => (
                purchase.amount_from_balance,
                LedgerReason::PurchaseCompensation,
            ),
            PurchaseEffect::SettleRefund => {
                (purchase.amount_charged(), LedgerReason::MoneyBackRefund)
            }
            PurchaseEffect::CreditLateCharge => (
                purchase.amount_from_gateway,
                LedgerReason::LateChargeCredit,
            ),
            PurchaseEffect::None | PurchaseEffect::ArmRefundTimer { .. } => return None,
        };
        if amount <= 0 {
            return None;
        }
        let entry =
            NewLedgerEntry::credit(purchase.pro_id, amount, reason).for_purchase(purchase.id);
        Some(match (self, &purchase.gateway_reference) {
            (PurchaseEffect::CreditLateCharge, Some(reference)) => {
                entry.with_reference(reference.as_str())
            }
            _ => entry,
        })
    }
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Append one entry. A debit that would take the balance below zero
    /// fails with [`StoreError::InsufficientBalance`] and writes nothing.
    async fn append_entry(
        &self,
        entry: NewLedgerEntry,
        now: OffsetDateTime,
    ) -> Result<LedgerEntry, StoreError>;

    async fn balance_of(&self, pro_id: Uuid) -> Result<i64, StoreError>;

    /// Entries of one pro, newest first.
    async fn entries(&self, pro_id: Uuid) -> Result<Vec<LedgerEntry>, StoreError>;
}

#[async_trait]
pub trait PurchaseStore: Send + Sync {
    /// Create the purchase in `Pending` and fund it from the balance in one
    /// transaction: insert, balance read, debit, and the resulting status
    /// (plus the refund timer when the balance covered everything).
    async fn open_purchase(
        &self,
        new: NewPurchase,
        coverage: CoveragePolicy,
        refund_window: Duration,
        now: OffsetDateTime,
    ) -> Result<Purchase, StoreError>;

    async fn purchase(&self, id: Uuid) -> Result<Option<Purchase>, StoreError>;

    async fn active_purchase(
        &self,
        job_id: Uuid,
        pro_id: Uuid,
    ) -> Result<Option<Purchase>, StoreError>;

    /// Write `purchase` if the stored version still equals `purchase.version`,
    /// committing `effect` in the same transaction. Returns the stored row.
    async fn update_purchase(
        &self,
        purchase: &Purchase,
        effect: PurchaseEffect,
        now: OffsetDateTime,
    ) -> Result<Purchase, StoreError>;

    /// Purchases in `status` not written since `before`, oldest first.
    async fn stale_purchases(
        &self,
        status: PurchaseStatus,
        before: OffsetDateTime,
        charge_in_flight: Option<bool>,
        limit: usize,
    ) -> Result<Vec<Purchase>, StoreError>;
}

#[async_trait]
pub trait RefundTimerStore: Send + Sync {
    /// Arm a timer unless the purchase already has one. Returns whether it was armed.
    async fn arm_timer(&self, timer: RefundTimer) -> Result<bool, StoreError>;

    async fn timer(&self, purchase_id: Uuid) -> Result<Option<RefundTimer>, StoreError>;

    /// Cancel an unfired timer. Returns whether this call cancelled it.
    async fn cancel_timer(&self, purchase_id: Uuid, now: OffsetDateTime)
    -> Result<bool, StoreError>;

    /// Compare-and-set `fired` from false to true. Returns whether this call fired it.
    async fn mark_timer_fired(
        &self,
        purchase_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<bool, StoreError>;

    async fn due_timers(
        &self,
        now: OffsetDateTime,
        limit: usize,
    ) -> Result<Vec<RefundTimer>, StoreError>;

    /// Fired timers whose refund has not been written yet.
    async fn unsettled_timers(&self, limit: usize) -> Result<Vec<RefundTimer>, StoreError>;
}

/// Everything the core needs from storage.
pub trait Store: LedgerStore + PurchaseStore + RefundTimerStore {}

impl<T: LedgerStore + PurchaseStore + RefundTimerStore> Store for T {}

pub type SharedStore = Arc<dyn Store>;

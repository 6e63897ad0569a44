use super::{LedgerStore, PurchaseEffect, PurchaseStore, RefundTimerStore, StoreError};
use crate::config::CoveragePolicy;
use crate::entities::{
    EntryKind, LedgerEntry, LedgerReason, NewLedgerEntry, NewPurchase, Purchase, PurchaseStatus,
    RefundTimer,
};
use crate::purchase::FundingPlan;
use async_trait::async_trait;
use sqlx::PgPool;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

/// Partial unique index over the active purchase statuses.
const ACTIVE_PURCHASE_INDEX: &str = "purchases_one_active_per_job_pro";
/// Partial unique index allowing one compensation and one refund per purchase.
const SETTLEMENT_INDEX: &str = "ledger_entries_one_settlement_per_purchase";

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn violates(error: &sqlx::Error, constraint: &str) -> bool {
    error
        .as_database_error()
        .and_then(|e| e.constraint())
        .is_some_and(|c| c == constraint)
}

/// Insert `entry` inside `conn`'s transaction, enforcing the same rules as
/// the in-memory adapter. The caller must hold the pro's account lock.
async fn append_locked(
    conn: &mut sqlx::PgConnection,
    entry: &NewLedgerEntry,
    now: OffsetDateTime,
) -> Result<LedgerEntry, StoreError> {
    if entry.amount <= 0 {
        return Err(StoreError::InvalidAmount(entry.amount));
    }
    if entry.kind == EntryKind::Debit {
        let available = LedgerEntry::balance_of(conn, entry.pro_id).await?;
        if available < entry.amount {
            return Err(StoreError::InsufficientBalance {
                available,
                required: entry.amount,
            });
        }
    }
    LedgerEntry::insert(conn, entry, now).await.map_err(|e| {
        match entry.purchase_id {
            Some(purchase_id) if violates(&e, SETTLEMENT_INDEX) => {
                StoreError::DuplicateSettlement {
                    purchase_id,
                    reason: entry.reason,
                }
            }
            _ => StoreError::Database(e),
        }
    })
}

#[async_trait]
impl LedgerStore for PgStore {
    #[tracing::instrument(skip_all, err, name = "SQL:append_entry")]
    async fn append_entry(
        &self,
        entry: NewLedgerEntry,
        now: OffsetDateTime,
    ) -> Result<LedgerEntry, StoreError> {
        let mut tx = self.pool.begin().await?;
        LedgerEntry::lock_account(&mut tx, entry.pro_id).await?;
        let stored = append_locked(&mut tx, &entry, now).await?;
        tx.commit().await?;
        Ok(stored)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:balance_of")]
    async fn balance_of(&self, pro_id: Uuid) -> Result<i64, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(LedgerEntry::balance_of(&mut conn, pro_id).await?)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:ledger_entries")]
    async fn entries(&self, pro_id: Uuid) -> Result<Vec<LedgerEntry>, StoreError> {
        Ok(LedgerEntry::list_for_pro(&self.pool, pro_id).await?)
    }
}

#[async_trait]
impl PurchaseStore for PgStore {
    #[tracing::instrument(skip_all, err, name = "SQL:open_purchase")]
    async fn open_purchase(
        &self,
        new: NewPurchase,
        coverage: CoveragePolicy,
        refund_window: Duration,
        now: OffsetDateTime,
    ) -> Result<Purchase, StoreError> {
        let (job_id, pro_id) = (new.job_id, new.pro_id);
        let mut tx = self.pool.begin().await?;
        let pending = Purchase::pending(new, now);

        if let Err(e) = Purchase::insert(&mut tx, &pending).await {
            if !violates(&e, ACTIVE_PURCHASE_INDEX) {
                return Err(e.into());
            }
            drop(tx);
            // The winner may have failed in the meantime; report that as a lost race.
            return match Purchase::find_active(&self.pool, job_id, pro_id).await? {
                Some(existing) => Err(StoreError::DuplicateActivePurchase {
                    existing: existing.id,
                }),
                None => Err(StoreError::VersionConflict(pending.id)),
            };
        }

        LedgerEntry::lock_account(&mut tx, pro_id).await?;
        let available = LedgerEntry::balance_of(&mut tx, pro_id).await?;
        let plan = FundingPlan::decide(available, pending.final_price(), coverage).ok_or(
            StoreError::InsufficientBalance {
                available,
                required: pending.final_price(),
            },
        )?;
        if plan.from_balance > 0 {
            let debit = NewLedgerEntry::debit(pro_id, plan.from_balance, LedgerReason::LeadPurchase)
                .for_purchase(pending.id);
            append_locked(&mut tx, &debit, now).await?;
        }

        let mut funded = pending.clone();
        funded.amount_from_balance = plan.from_balance;
        funded.amount_from_gateway = plan.from_gateway;
        funded.status = plan.status();
        let stored = Purchase::update_versioned(&mut tx, &funded, now)
            .await?
            .ok_or(StoreError::VersionConflict(funded.id))?;

        if stored.status == PurchaseStatus::Succeeded {
            let timer = RefundTimer::armed(stored.id, now, now + refund_window);
            RefundTimer::insert_if_absent(&mut tx, &timer).await?;
        }

        tx.commit().await?;
        Ok(stored)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:purchase")]
    async fn purchase(&self, id: Uuid) -> Result<Option<Purchase>, StoreError> {
        Ok(Purchase::find_by_id(&self.pool, id).await?)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:active_purchase")]
    async fn active_purchase(
        &self,
        job_id: Uuid,
        pro_id: Uuid,
    ) -> Result<Option<Purchase>, StoreError> {
        Ok(Purchase::find_active(&self.pool, job_id, pro_id).await?)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:update_purchase")]
    async fn update_purchase(
        &self,
        purchase: &Purchase,
        effect: PurchaseEffect,
        now: OffsetDateTime,
    ) -> Result<Purchase, StoreError> {
        let mut tx = self.pool.begin().await?;
        let entry = effect.ledger_entry(purchase);
        if entry.is_some() {
            LedgerEntry::lock_account(&mut tx, purchase.pro_id).await?;
        }

        let stored = Purchase::update_versioned(&mut tx, purchase, now)
            .await?
            .ok_or(StoreError::VersionConflict(purchase.id))?;

        if let Some(entry) = &entry {
            append_locked(&mut tx, entry, now).await?;
        }
        match effect {
            PurchaseEffect::ArmRefundTimer { deadline } => {
                let timer = RefundTimer::armed(purchase.id, now, deadline);
                RefundTimer::insert_if_absent(&mut tx, &timer).await?;
            }
            PurchaseEffect::SettleRefund => {
                if !RefundTimer::mark_settled(&mut tx, purchase.id, now).await? {
                    return Err(StoreError::TimerNotFired(purchase.id));
                }
            }
            PurchaseEffect::None
            | PurchaseEffect::CompensateBalance
            | PurchaseEffect::CreditLateCharge => {}
        }

        tx.commit().await?;
        Ok(stored)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:stale_purchases")]
    async fn stale_purchases(
        &self,
        status: PurchaseStatus,
        before: OffsetDateTime,
        charge_in_flight: Option<bool>,
        limit: usize,
    ) -> Result<Vec<Purchase>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        Ok(Purchase::list_stale(&self.pool, status, before, charge_in_flight, limit).await?)
    }
}

#[async_trait]
impl RefundTimerStore for PgStore {
    #[tracing::instrument(skip_all, err, name = "SQL:arm_timer")]
    async fn arm_timer(&self, timer: RefundTimer) -> Result<bool, StoreError> {
        let mut conn = self.pool.acquire().await?;
        Ok(RefundTimer::insert_if_absent(&mut conn, &timer).await?)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:timer")]
    async fn timer(&self, purchase_id: Uuid) -> Result<Option<RefundTimer>, StoreError> {
        Ok(RefundTimer::find(&self.pool, purchase_id).await?)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:cancel_timer")]
    async fn cancel_timer(
        &self,
        purchase_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<bool, StoreError> {
        Ok(RefundTimer::cancel(&self.pool, purchase_id, now).await?)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:mark_timer_fired")]
    async fn mark_timer_fired(
        &self,
        purchase_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<bool, StoreError> {
        Ok(RefundTimer::mark_fired(&self.pool, purchase_id, now).await?)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:due_timers")]
    async fn due_timers(
        &self,
        now: OffsetDateTime,
        limit: usize,
    ) -> Result<Vec<RefundTimer>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        Ok(RefundTimer::list_due(&self.pool, now, limit).await?)
    }

    #[tracing::instrument(skip_all, err, name = "SQL:unsettled_timers")]
    async fn unsettled_timers(&self, limit: usize) -> Result<Vec<RefundTimer>, StoreError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        Ok(RefundTimer::list_unsettled(&self.pool, limit).await?)
    }
}

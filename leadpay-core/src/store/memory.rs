use super::{
    LedgerStore, PurchaseEffect, PurchaseStore, RefundTimerStore, StoreError,
};
use crate::config::CoveragePolicy;
use crate::entities::{
    EntryKind, LedgerEntry, LedgerReason, NewLedgerEntry, NewPurchase, Purchase, PurchaseStatus,
    RefundTimer,
};
use crate::purchase::FundingPlan;
use async_trait::async_trait;
use itertools::Itertools;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use time::{Duration, OffsetDateTime};
use tokio::sync::Mutex;
use uuid::Uuid;

/// A thread-safe in-memory store.
///
/// All state sits behind one `Mutex`, so every trait call is atomic with
/// respect to every other call.
#[derive(Default, Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
    settlement_faults: Arc<AtomicU32>,
}

#[derive(Default)]
struct MemoryState {
    entries: Vec<LedgerEntry>,
    purchases: HashMap<Uuid, Purchase>,
    timers: HashMap<Uuid, RefundTimer>,
}

impl MemoryState {
    fn balance(&self, pro_id: Uuid) -> i64 {
        self.entries
            .iter()
            .filter(|e| e.pro_id == pro_id)
            .map(|e| e.amount)
            .sum()
    }

    fn active_purchase(&self, job_id: Uuid, pro_id: Uuid) -> Option<&Purchase> {
        self.purchases
            .values()
            .find(|p| p.job_id == job_id && p.pro_id == pro_id && p.status.is_active())
    }

    /// Validate `entry` against the current state without writing it.
    fn check_entry(&self, entry: &NewLedgerEntry) -> Result<(), StoreError> {
        if entry.amount <= 0 {
            return Err(StoreError::InvalidAmount(entry.amount));
        }
        if entry.kind == EntryKind::Debit {
            let available = self.balance(entry.pro_id);
            if available < entry.amount {
                return Err(StoreError::InsufficientBalance {
                    available,
                    required: entry.amount,
                });
            }
        }
        if let Some(purchase_id) = entry.purchase_id
            && entry.reason.is_settlement()
            && self
                .entries
                .iter()
                .any(|e| e.purchase_id == Some(purchase_id) && e.reason == entry.reason)
        {
            return Err(StoreError::DuplicateSettlement {
                purchase_id,
                reason: entry.reason,
            });
        }
        Ok(())
    }

    fn push_entry(&mut self, entry: &NewLedgerEntry, now: OffsetDateTime) -> LedgerEntry {
        let stored = LedgerEntry {
            id: self.entries.len() as i64 + 1,
            pro_id: entry.pro_id,
            amount: entry.signed_amount(),
            kind: entry.kind,
            reason: entry.reason,
            purchase_id: entry.purchase_id,
            reference: entry.reference.clone(),
            created_at: now,
        };
        self.entries.push(stored.clone());
        stored
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` refund settlements fail as if the database were down.
    #[cfg(test)]
    pub(crate) fn fail_next_settlements(&self, count: u32) {
        self.settlement_faults.store(count, Ordering::SeqCst);
    }

    fn take_settlement_fault(&self) -> bool {
        self.settlement_faults
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn append_entry(
        &self,
        entry: NewLedgerEntry,
        now: OffsetDateTime,
    ) -> Result<LedgerEntry, StoreError> {
        let mut state = self.state.lock().await;
        state.check_entry(&entry)?;
        Ok(state.push_entry(&entry, now))
    }

    async fn balance_of(&self, pro_id: Uuid) -> Result<i64, StoreError> {
        Ok(self.state.lock().await.balance(pro_id))
    }

    async fn entries(&self, pro_id: Uuid) -> Result<Vec<LedgerEntry>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .entries
            .iter()
            .rev()
            .filter(|e| e.pro_id == pro_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl PurchaseStore for MemoryStore {
    async fn open_purchase(
        &self,
        new: NewPurchase,
        coverage: CoveragePolicy,
        refund_window: Duration,
        now: OffsetDateTime,
    ) -> Result<Purchase, StoreError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.active_purchase(new.job_id, new.pro_id) {
            return Err(StoreError::DuplicateActivePurchase {
                existing: existing.id,
            });
        }

        let mut purchase = Purchase::pending(new, now);
        let available = state.balance(purchase.pro_id);
        let plan = FundingPlan::decide(available, purchase.final_price(), coverage).ok_or(
            StoreError::InsufficientBalance {
                available,
                required: purchase.final_price(),
            },
        )?;

        if plan.from_balance > 0 {
            let debit = NewLedgerEntry::debit(
                purchase.pro_id,
                plan.from_balance,
                LedgerReason::LeadPurchase,
            )
            .for_purchase(purchase.id);
            state.check_entry(&debit)?;
            state.push_entry(&debit, now);
        }

        purchase.amount_from_balance = plan.from_balance;
        purchase.amount_from_gateway = plan.from_gateway;
        purchase.status = plan.status();
        purchase.version += 1;
        if purchase.status == PurchaseStatus::Succeeded {
            state.timers.insert(
                purchase.id,
                RefundTimer::armed(purchase.id, now, now + refund_window),
            );
        }
        state.purchases.insert(purchase.id, purchase.clone());
        Ok(purchase)
    }

    async fn purchase(&self, id: Uuid) -> Result<Option<Purchase>, StoreError> {
        Ok(self.state.lock().await.purchases.get(&id).cloned())
    }

    async fn active_purchase(
        &self,
        job_id: Uuid,
        pro_id: Uuid,
    ) -> Result<Option<Purchase>, StoreError> {
        Ok(self
            .state
            .lock()
            .await
            .active_purchase(job_id, pro_id)
            .cloned())
    }

    async fn update_purchase(
        &self,
        purchase: &Purchase,
        effect: PurchaseEffect,
        now: OffsetDateTime,
    ) -> Result<Purchase, StoreError> {
        if effect == PurchaseEffect::SettleRefund && self.take_settlement_fault() {
            return Err(StoreError::Unavailable("injected settlement failure".into()));
        }

        let mut state = self.state.lock().await;
        let stored = state
            .purchases
            .get(&purchase.id)
            .ok_or(StoreError::PurchaseNotFound(purchase.id))?;
        if stored.version != purchase.version {
            return Err(StoreError::VersionConflict(purchase.id));
        }

        // Validate every part before writing any of it.
        let entry = effect.ledger_entry(purchase);
        if let Some(entry) = &entry {
            state.check_entry(entry)?;
        }
        if effect == PurchaseEffect::SettleRefund
            && !state
                .timers
                .get(&purchase.id)
                .is_some_and(RefundTimer::awaits_settlement)
        {
            return Err(StoreError::TimerNotFired(purchase.id));
        }

        if let Some(entry) = &entry {
            state.push_entry(entry, now);
        }
        match effect {
            PurchaseEffect::ArmRefundTimer { deadline } => {
                state
                    .timers
                    .entry(purchase.id)
                    .or_insert_with(|| RefundTimer::armed(purchase.id, now, deadline));
            }
            PurchaseEffect::SettleRefund => {
                if let Some(timer) = state.timers.get_mut(&purchase.id) {
                    timer.settled_at = Some(now);
                }
            }
            PurchaseEffect::None
            | PurchaseEffect::CompensateBalance
            | PurchaseEffect::CreditLateCharge => {}
        }

        let mut updated = purchase.clone();
        updated.version += 1;
        updated.updated_at = now;
        state.purchases.insert(updated.id, updated.clone());
        Ok(updated)
    }

    async fn stale_purchases(
        &self,
        status: PurchaseStatus,
        before: OffsetDateTime,
        charge_in_flight: Option<bool>,
        limit: usize,
    ) -> Result<Vec<Purchase>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .purchases
            .values()
            .filter(|p| p.status == status && p.updated_at < before)
            .filter(|p| charge_in_flight.is_none_or(|flag| p.charge_in_flight == flag))
            .sorted_by_key(|p| p.updated_at)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RefundTimerStore for MemoryStore {
    async fn arm_timer(&self, timer: RefundTimer) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        if state.timers.contains_key(&timer.purchase_id) {
            return Ok(false);
        }
        state.timers.insert(timer.purchase_id, timer);
        Ok(true)
    }

    async fn timer(&self, purchase_id: Uuid) -> Result<Option<RefundTimer>, StoreError> {
        Ok(self.state.lock().await.timers.get(&purchase_id).cloned())
    }

    async fn cancel_timer(
        &self,
        purchase_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        match state.timers.get_mut(&purchase_id) {
            Some(timer) if !timer.fired && timer.cancelled_at.is_none() => {
                timer.cancelled_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_timer_fired(
        &self,
        purchase_id: Uuid,
        now: OffsetDateTime,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        match state.timers.get_mut(&purchase_id) {
            Some(timer) if !timer.fired && timer.cancelled_at.is_none() => {
                timer.fired = true;
                timer.fired_at = Some(now);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn due_timers(
        &self,
        now: OffsetDateTime,
        limit: usize,
    ) -> Result<Vec<RefundTimer>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .timers
            .values()
            .filter(|t| t.is_due(now))
            .sorted_by_key(|t| t.deadline)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn unsettled_timers(&self, limit: usize) -> Result<Vec<RefundTimer>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .timers
            .values()
            .filter(|t| t.awaits_settlement())
            .sorted_by_key(|t| t.fired_at)
            .take(limit)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{breakdown, ts};

    fn new_purchase(job_id: Uuid, pro_id: Uuid, price: i64) -> NewPurchase {
        NewPurchase {
            id: Uuid::now_v7(),
            job_id,
            pro_id,
            price_breakdown: breakdown(price),
        }
    }

    async fn top_up(store: &MemoryStore, pro_id: Uuid, amount: i64) {
        store
            .append_entry(
                NewLedgerEntry::credit(pro_id, amount, LedgerReason::TopUp),
                ts(0),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_debit_cannot_overdraw() {
        let store = MemoryStore::new();
        let pro = Uuid::now_v7();
        top_up(&store, pro, 1_000).await;

        let err = store
            .append_entry(
                NewLedgerEntry::debit(pro, 1_001, LedgerReason::Adjustment),
                ts(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::InsufficientBalance {
                available: 1_000,
                required: 1_001
            }
        ));
        assert_eq!(store.balance_of(pro).await.unwrap(), 1_000);
        assert_eq!(store.entries(pro).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_debits_keep_balance_non_negative() {
        let store = MemoryStore::new();
        let pro = Uuid::now_v7();
        top_up(&store, pro, 10_000).await;

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .append_entry(
                            NewLedgerEntry::debit(pro, 300, LedgerReason::Adjustment),
                            ts(1),
                        )
                        .await
                        .is_ok()
                })
            })
            .collect();
        let mut succeeded = 0;
        for handle in handles {
            if handle.await.unwrap() {
                succeeded += 1;
            }
        }

        assert_eq!(succeeded, 33);
        let balance = store.balance_of(pro).await.unwrap();
        assert_eq!(balance, 100);
        let sum: i64 = store.entries(pro).await.unwrap().iter().map(|e| e.amount).sum();
        assert_eq!(sum, balance);
    }

    #[tokio::test]
    async fn test_open_purchase_funds_from_balance() {
        let store = MemoryStore::new();
        let (job, pro) = (Uuid::now_v7(), Uuid::now_v7());
        top_up(&store, pro, 20_000).await;

        let purchase = store
            .open_purchase(
                new_purchase(job, pro, 18_000),
                CoveragePolicy::Partial,
                Duration::hours(48),
                ts(10),
            )
            .await
            .unwrap();
        assert_eq!(purchase.status, PurchaseStatus::Succeeded);
        assert_eq!(purchase.amount_from_balance, 18_000);
        assert_eq!(store.balance_of(pro).await.unwrap(), 2_000);

        let timer = store.timer(purchase.id).await.unwrap().unwrap();
        assert_eq!(timer.deadline, ts(10) + Duration::hours(48));
    }

    #[tokio::test]
    async fn test_one_active_purchase_per_job_and_pro() {
        let store = MemoryStore::new();
        let (job, pro) = (Uuid::now_v7(), Uuid::now_v7());
        let first = store
            .open_purchase(
                new_purchase(job, pro, 5_000),
                CoveragePolicy::Partial,
                Duration::hours(48),
                ts(0),
            )
            .await
            .unwrap();

        let err = store
            .open_purchase(
                new_purchase(job, pro, 5_000),
                CoveragePolicy::Partial,
                Duration::hours(48),
                ts(1),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::DuplicateActivePurchase { existing } if existing == first.id
        ));

        // A failed purchase frees the slot.
        let mut failed = first.clone();
        failed.status = PurchaseStatus::Failed;
        store
            .update_purchase(&failed, PurchaseEffect::CompensateBalance, ts(2))
            .await
            .unwrap();
        store
            .open_purchase(
                new_purchase(job, pro, 5_000),
                CoveragePolicy::Partial,
                Duration::hours(48),
                ts(3),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_opens_yield_one_purchase() {
        let store = MemoryStore::new();
        let (job, pro) = (Uuid::now_v7(), Uuid::now_v7());
        top_up(&store, pro, 100_000).await;

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .open_purchase(
                            new_purchase(job, pro, 18_000),
                            CoveragePolicy::Partial,
                            Duration::hours(48),
                            ts(0),
                        )
                        .await
                })
            })
            .collect();
        let mut opened = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => opened += 1,
                Err(StoreError::DuplicateActivePurchase { .. }) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(opened, 1);
        assert_eq!(store.balance_of(pro).await.unwrap(), 82_000);
    }

    #[tokio::test]
    async fn test_stale_version_is_rejected() {
        let store = MemoryStore::new();
        let purchase = store
            .open_purchase(
                new_purchase(Uuid::now_v7(), Uuid::now_v7(), 5_000),
                CoveragePolicy::Partial,
                Duration::hours(48),
                ts(0),
            )
            .await
            .unwrap();

        let mut first = purchase.clone();
        first.charge_in_flight = true;
        store
            .update_purchase(&first, PurchaseEffect::None, ts(1))
            .await
            .unwrap();

        let err = store
            .update_purchase(&purchase, PurchaseEffect::None, ts(2))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict(id) if id == purchase.id));
    }

    #[tokio::test]
    async fn test_compensation_is_written_once() {
        let store = MemoryStore::new();
        let pro = Uuid::now_v7();
        top_up(&store, pro, 5_000).await;
        let purchase = store
            .open_purchase(
                new_purchase(Uuid::now_v7(), pro, 18_000),
                CoveragePolicy::Partial,
                Duration::hours(48),
                ts(0),
            )
            .await
            .unwrap();
        assert_eq!(store.balance_of(pro).await.unwrap(), 0);

        let entry = PurchaseEffect::CompensateBalance.ledger_entry(&purchase).unwrap();
        store.append_entry(entry.clone(), ts(1)).await.unwrap();
        let err = store.append_entry(entry, ts(2)).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateSettlement { .. }));
        assert_eq!(store.balance_of(pro).await.unwrap(), 5_000);
    }

    #[tokio::test]
    async fn test_timer_cancel_and_fire_are_exclusive() {
        let store = MemoryStore::new();
        let id = Uuid::now_v7();
        assert!(store.arm_timer(RefundTimer::armed(id, ts(0), ts(100))).await.unwrap());
        assert!(!store.arm_timer(RefundTimer::armed(id, ts(5), ts(200))).await.unwrap());
        assert_eq!(store.timer(id).await.unwrap().unwrap().deadline, ts(100));

        assert!(store.due_timers(ts(99), 10).await.unwrap().is_empty());
        assert_eq!(store.due_timers(ts(100), 10).await.unwrap().len(), 1);

        assert!(store.mark_timer_fired(id, ts(100)).await.unwrap());
        assert!(!store.mark_timer_fired(id, ts(101)).await.unwrap());
        assert!(!store.cancel_timer(id, ts(102)).await.unwrap());
        assert_eq!(store.unsettled_timers(10).await.unwrap().len(), 1);
    }
}

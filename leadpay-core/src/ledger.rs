//! Per-pro balance as an append-only ledger.

use crate::entities::{LedgerEntry, LedgerReason, NewLedgerEntry};
use crate::store::{SharedStore, StoreError};
use leadpay_sdk::objects::RetrySafety;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger amounts must be positive, got {0}")]
    InvalidAmount(i64),

    #[error("insufficient balance: {available} available, {required} required")]
    InsufficientBalance { available: i64, required: i64 },

    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for LedgerError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InvalidAmount(amount) => LedgerError::InvalidAmount(amount),
            StoreError::InsufficientBalance {
                available,
                required,
            } => LedgerError::InsufficientBalance {
                available,
                required,
            },
            other => LedgerError::Store(other),
        }
    }
}

impl LedgerError {
    pub fn retry_safety(&self) -> RetrySafety {
        match self {
            LedgerError::InvalidAmount(_) | LedgerError::InsufficientBalance { .. } => {
                RetrySafety::AfterCorrection
            }
            LedgerError::Store(_) => RetrySafety::Safe,
        }
    }
}

/// The only source of truth for balances. Nothing caches a balance; every
/// read folds the entries.
#[derive(Clone)]
pub struct BalanceLedger {
    store: SharedStore,
}

impl BalanceLedger {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    /// Take `amount` from the balance, or fail without writing anything.
    pub async fn debit(
        &self,
        pro_id: Uuid,
        amount: i64,
        reason: LedgerReason,
    ) -> Result<LedgerEntry, LedgerError> {
        self.append(NewLedgerEntry::debit(pro_id, amount, reason))
            .await
    }

    pub async fn credit(
        &self,
        pro_id: Uuid,
        amount: i64,
        reason: LedgerReason,
    ) -> Result<LedgerEntry, LedgerError> {
        self.append(NewLedgerEntry::credit(pro_id, amount, reason))
            .await
    }

    /// Credit a wallet top-up settled elsewhere.
    pub async fn top_up(
        &self,
        pro_id: Uuid,
        amount: i64,
        reference: Option<String>,
    ) -> Result<LedgerEntry, LedgerError> {
        let mut entry = NewLedgerEntry::credit(pro_id, amount, LedgerReason::TopUp);
        entry.reference = reference;
        let entry = self.append(entry).await?;
        info!(pro_id = %pro_id, amount = amount, "Balance topped up");
        Ok(entry)
    }

    pub async fn balance_of(&self, pro_id: Uuid) -> Result<i64, LedgerError> {
        Ok(self.store.balance_of(pro_id).await?)
    }

    /// Audit trail, newest first.
    pub async fn entries(&self, pro_id: Uuid) -> Result<Vec<LedgerEntry>, LedgerError> {
        Ok(self.store.entries(pro_id).await?)
    }

    async fn append(&self, entry: NewLedgerEntry) -> Result<LedgerEntry, LedgerError> {
        if entry.amount <= 0 {
            return Err(LedgerError::InvalidAmount(entry.amount));
        }
        Ok(self
            .store
            .append_entry(entry, OffsetDateTime::now_utc())
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn ledger() -> BalanceLedger {
        BalanceLedger::new(Arc::new(MemoryStore::new()))
    }

    #[tokio::test]
    async fn test_balance_is_sum_of_entries() {
        let ledger = ledger();
        let pro = Uuid::now_v7();
        ledger.top_up(pro, 10_000, Some("tx-1".into())).await.unwrap();
        ledger
            .debit(pro, 3_500, LedgerReason::LeadPurchase)
            .await
            .unwrap();
        ledger
            .credit(pro, 500, LedgerReason::Adjustment)
            .await
            .unwrap();

        assert_eq!(ledger.balance_of(pro).await.unwrap(), 7_000);
        let entries = ledger.entries(pro).await.unwrap();
        let amounts: Vec<_> = entries.iter().map(|e| e.amount).collect();
        assert_eq!(amounts, vec![500, -3_500, 10_000]);
        assert_eq!(entries[2].reference.as_deref(), Some("tx-1"));
    }

    #[tokio::test]
    async fn test_overdraw_is_rejected() {
        let ledger = ledger();
        let pro = Uuid::now_v7();
        ledger.top_up(pro, 1_000, None).await.unwrap();

        let err = ledger
            .debit(pro, 1_001, LedgerReason::LeadPurchase)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientBalance {
                available: 1_000,
                required: 1_001
            }
        ));
        assert_eq!(ledger.balance_of(pro).await.unwrap(), 1_000);
        assert_eq!(ledger.entries(pro).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_non_positive_amounts_are_rejected() {
        let ledger = ledger();
        let pro = Uuid::now_v7();
        for amount in [0, -5] {
            let err = ledger
                .credit(pro, amount, LedgerReason::Adjustment)
                .await
                .unwrap_err();
            assert!(matches!(err, LedgerError::InvalidAmount(a) if a == amount));
        }
        assert!(ledger.entries(pro).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_pro_has_zero_balance() {
        assert_eq!(ledger().balance_of(Uuid::now_v7()).await.unwrap(), 0);
    }
}

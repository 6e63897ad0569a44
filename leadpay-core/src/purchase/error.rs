use crate::entities::PurchaseStatus;
use crate::store::StoreError;
use crate::vault::VaultError;
use leadpay_sdk::objects::RetrySafety;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum PurchaseError {
    #[error("lead price must be positive, got {0}")]
    InvalidAmount(i64),

    #[error("purchase not found: {0}")]
    PurchaseNotFound(Uuid),

    #[error("cannot {operation} purchase {purchase_id} in status {status}")]
    InvalidTransition {
        purchase_id: Uuid,
        status: PurchaseStatus,
        operation: &'static str,
    },

    #[error("purchase {existing} is already active for this job")]
    DuplicateActivePurchase { existing: Uuid },

    #[error("purchase {0} was modified concurrently; reload it")]
    ConcurrentModification(Uuid),

    #[error("a charge for purchase {0} is already in progress")]
    ChargeInProgress(Uuid),

    #[error("insufficient balance: {available} available, {required} required")]
    InsufficientBalance { available: i64, required: i64 },

    #[error("payment declined: {reason}")]
    Declined { reason: String, attempts_left: u32 },

    #[error("payment declined and no attempts left: {reason}")]
    AttemptsExhausted { reason: String },

    #[error("purchase {0} is still waiting for gateway confirmation")]
    ConfirmationPending(Uuid),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error("store error: {0}")]
    Store(StoreError),
}

impl From<StoreError> for PurchaseError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateActivePurchase { existing } => {
                PurchaseError::DuplicateActivePurchase { existing }
            }
            StoreError::InsufficientBalance {
                available,
                required,
            } => PurchaseError::InsufficientBalance {
                available,
                required,
            },
            StoreError::VersionConflict(id) => PurchaseError::ConcurrentModification(id),
            StoreError::PurchaseNotFound(id) => PurchaseError::PurchaseNotFound(id),
            other => PurchaseError::Store(other),
        }
    }
}

impl PurchaseError {
    pub fn retry_safety(&self) -> RetrySafety {
        match self {
            PurchaseError::InvalidAmount(_)
            | PurchaseError::InvalidTransition { .. }
            | PurchaseError::InsufficientBalance { .. }
            | PurchaseError::Declined { .. } => RetrySafety::AfterCorrection,
            PurchaseError::PurchaseNotFound(_)
            | PurchaseError::DuplicateActivePurchase { .. }
            | PurchaseError::ConcurrentModification(_)
            | PurchaseError::ChargeInProgress(_)
            | PurchaseError::AttemptsExhausted { .. } => RetrySafety::Never,
            PurchaseError::ConfirmationPending(_) => RetrySafety::Safe,
            PurchaseError::Vault(e) => e.retry_safety(),
            PurchaseError::Store(StoreError::Database(_) | StoreError::Unavailable(_)) => {
                RetrySafety::Safe
            }
            PurchaseError::Store(_) => RetrySafety::Never,
        }
    }
}

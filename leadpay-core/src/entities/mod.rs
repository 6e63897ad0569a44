pub mod ledger_entry;
pub mod purchase;
pub mod refund_timer;

pub use ledger_entry::{LedgerEntry, NewLedgerEntry};
pub use purchase::{NewPurchase, Purchase};
pub use refund_timer::RefundTimer;

use leadpay_sdk::objects::PurchaseStatus as SdkPurchaseStatus;

/// Purchase status for database operations.
///
/// This is the sqlx::Type version. For API/DTO use, see `leadpay_sdk::objects::PurchaseStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "snake_case", type_name = "purchase_status")]
pub enum PurchaseStatus {
    Pending,
    AwaitingPaymentMethod,
    AwaitingGatewayConfirmation,
    Succeeded,
    RefundPending,
    Refunded,
    Failed,
}

impl PurchaseStatus {
    /// Covered by the one-active-purchase-per-(job, pro) rule.
    pub fn is_active(self) -> bool {
        !matches!(self, PurchaseStatus::Refunded | PurchaseStatus::Failed)
    }

    /// The lead has been paid for and not refunded yet.
    pub fn is_paid(self) -> bool {
        matches!(self, PurchaseStatus::Succeeded | PurchaseStatus::RefundPending)
    }
}

impl std::fmt::Display for PurchaseStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        SdkPurchaseStatus::from(*self).fmt(f)
    }
}

impl From<PurchaseStatus> for SdkPurchaseStatus {
    fn from(value: PurchaseStatus) -> Self {
        match value {
            PurchaseStatus::Pending => SdkPurchaseStatus::Pending,
            PurchaseStatus::AwaitingPaymentMethod => SdkPurchaseStatus::AwaitingPaymentMethod,
            PurchaseStatus::AwaitingGatewayConfirmation => {
                SdkPurchaseStatus::AwaitingGatewayConfirmation
            }
            PurchaseStatus::Succeeded => SdkPurchaseStatus::Succeeded,
            PurchaseStatus::RefundPending => SdkPurchaseStatus::RefundPending,
            PurchaseStatus::Refunded => SdkPurchaseStatus::Refunded,
            PurchaseStatus::Failed => SdkPurchaseStatus::Failed,
        }
    }
}

/// Direction of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase", type_name = "ledger_entry_kind")]
pub enum EntryKind {
    Credit,
    Debit,
}

/// Why a ledger entry was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "snake_case", type_name = "ledger_reason")]
pub enum LedgerReason {
    TopUp,
    LeadPurchase,
    PurchaseCompensation,
    MoneyBackRefund,
    /// The gateway charged a purchase that had already failed.
    LateChargeCredit,
    Adjustment,
}

impl LedgerReason {
    pub fn as_str(self) -> &'static str {
        match self {
            LedgerReason::TopUp => "top_up",
            LedgerReason::LeadPurchase => "lead_purchase",
            LedgerReason::PurchaseCompensation => "purchase_compensation",
            LedgerReason::MoneyBackRefund => "money_back_refund",
            LedgerReason::LateChargeCredit => "late_charge_credit",
            LedgerReason::Adjustment => "adjustment",
        }
    }

    /// Reasons that may be written at most once per purchase.
    pub fn is_settlement(self) -> bool {
        matches!(
            self,
            LedgerReason::PurchaseCompensation
                | LedgerReason::MoneyBackRefund
                | LedgerReason::LateChargeCredit
        )
    }
}

impl std::fmt::Display for LedgerReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

//! Event type definitions.

use leadpay_sdk::objects::LeadEventType;
use uuid::Uuid;

/// Something the marketplace has to react to.
///
/// Events carry everything the notifier needs, so delivery does not read the
/// store again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LeadEvent {
    /// The lead is paid for; the marketplace grants the pro contact access.
    LeadUnlocked {
        purchase_id: Uuid,
        job_id: Uuid,
        pro_id: Uuid,
        amount: i64,
    },
    /// The money-back guarantee paid out; access is revoked.
    LeadRefunded {
        purchase_id: Uuid,
        job_id: Uuid,
        pro_id: Uuid,
        amount: i64,
    },
    /// The purchase ended without unlocking the lead.
    PurchaseFailed {
        purchase_id: Uuid,
        job_id: Uuid,
        pro_id: Uuid,
        reason: String,
    },
}

impl LeadEvent {
    pub fn event_type(&self) -> LeadEventType {
        match self {
            LeadEvent::LeadUnlocked { .. } => LeadEventType::LeadUnlocked,
            LeadEvent::LeadRefunded { .. } => LeadEventType::LeadRefunded,
            LeadEvent::PurchaseFailed { .. } => LeadEventType::PurchaseFailed,
        }
    }

    pub fn purchase_id(&self) -> Uuid {
        match self {
            LeadEvent::LeadUnlocked { purchase_id, .. }
            | LeadEvent::LeadRefunded { purchase_id, .. }
            | LeadEvent::PurchaseFailed { purchase_id, .. } => *purchase_id,
        }
    }
}

//! Background processors.
//!
//! - `RefundGuaranteeScheduler`: sweeps due money-back timers and refunds
//! - `StuckPurchaseReaper`: fails confirmations nobody finished and releases
//!   abandoned charge claims
//! - `LeadEventNotifier`: receives `LeadEvent`, delivers signed callbacks
//!
//! Each one runs until the shared shutdown flag flips to `true`.

pub mod lead_event_notifier;
pub mod refund_scheduler;
pub mod stuck_purchase_reaper;

pub use lead_event_notifier::{LeadEventNotifier, NotifyError};
pub use refund_scheduler::{RefundGuaranteeScheduler, SchedulerError, TimerCancellation};
pub use stuck_purchase_reaper::StuckPurchaseReaper;

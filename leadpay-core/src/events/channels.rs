//! Event channel factories and handles.

use super::types::LeadEvent;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{error, warn};

/// Default buffer size for event channels.
///
/// This provides enough buffer to handle bursts while keeping memory bounded.
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

/// Sender handle for LeadEvent events.
pub type LeadEventSender = mpsc::Sender<LeadEvent>;
/// Receiver handle for LeadEvent events.
pub type LeadEventReceiver = mpsc::Receiver<LeadEvent>;

/// Create a new LeadEvent channel.
///
/// Multiple senders can be cloned from the returned sender.
pub fn lead_event_channel() -> (LeadEventSender, LeadEventReceiver) {
    mpsc::channel(DEFAULT_CHANNEL_BUFFER)
}

/// Queue `event` for the notifier without waiting. A full queue or a gone
/// notifier is logged, never returned: the state change behind the event is
/// already committed.
pub fn emit(sender: &LeadEventSender, event: LeadEvent) {
    let purchase_id = event.purchase_id();
    match sender.try_send(event) {
        Ok(()) => {}
        Err(TrySendError::Full(event)) => {
            warn!(
                purchase_id = %purchase_id,
                event_type = ?event.event_type(),
                "LeadEvent queue full, dropping event"
            );
        }
        Err(TrySendError::Closed(_)) => {
            error!(purchase_id = %purchase_id, "Failed to emit LeadEvent: notifier is gone");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn refunded() -> LeadEvent {
        LeadEvent::LeadRefunded {
            purchase_id: Uuid::now_v7(),
            job_id: Uuid::now_v7(),
            pro_id: Uuid::now_v7(),
            amount: 1_000,
        }
    }

    #[tokio::test]
    async fn test_emit_never_waits_on_a_full_queue() {
        let (tx, mut rx) = mpsc::channel(1);
        emit(&tx, refunded());
        emit(&tx, refunded());
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());

        drop(rx);
        emit(&tx, refunded());
    }
}

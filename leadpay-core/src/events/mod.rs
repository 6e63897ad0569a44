//! Event system.
//!
//! The purchase orchestrator and the refund scheduler emit [`LeadEvent`]s
//! after committing the state change they describe; the
//! `LeadEventNotifier` processor delivers them to the marketplace.

pub mod channels;
pub mod types;

pub use channels::{
    DEFAULT_CHANNEL_BUFFER, LeadEventReceiver, LeadEventSender, emit, lead_event_channel,
};
pub use types::LeadEvent;

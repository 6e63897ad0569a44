//! LeadEventNotifier processor.
//!
//! The LeadEventNotifier is responsible for:
//! - Receiving `LeadEvent` from the queue
//! - Turning each event into a signed `LeadEventPayload`
//! - POSTing it to the marketplace callback URL
//! - Retrying failed deliveries with exponential backoff (2^0 to 2^11 seconds)
//!
//! Without a callback URL the events are only logged.

use crate::config::NotifierConfig;
use crate::events::{LeadEvent, LeadEventReceiver};
use leadpay_sdk::objects::LeadEventPayload;
use leadpay_sdk::signature::{SIGNATURE_HEADER, SignedObject};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{RwLock, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use url::Url;

/// Maximum backoff exponent (2^11 = 2048 seconds)
const MAX_RETRY_COUNT: u32 = 11;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("HTTP request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("callback rejected the event with status {status}: {body}")]
    DeliveryFailed { status: u16, body: String },

    #[error("payload serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub struct LeadEventNotifier {
    config: Arc<RwLock<NotifierConfig>>,
    events_rx: LeadEventReceiver,
    shutdown_rx: watch::Receiver<bool>,
    http_client: reqwest::Client,
}

impl LeadEventNotifier {
    pub fn new(
        config: Arc<RwLock<NotifierConfig>>,
        events_rx: LeadEventReceiver,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            config,
            events_rx,
            shutdown_rx,
            http_client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    pub async fn run(mut self) {
        info!("LeadEventNotifier started");
        let mut deliveries = JoinSet::new();

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("LeadEventNotifier received shutdown signal");
                        break;
                    }
                }

                Some(event) = self.events_rx.recv() => {
                    debug!(event = ?event, "Received LeadEvent");
                    let config = self.config.read().await.clone();
                    let now = time::OffsetDateTime::now_utc().unix_timestamp();
                    let payload = payload_for(&event, now);
                    match config.callback_url {
                        Some(url) => {
                            deliveries.spawn(deliver(
                                self.http_client.clone(),
                                url,
                                config.secret,
                                config.max_attempts,
                                payload,
                                self.shutdown_rx.clone(),
                            ));
                        }
                        None => info!(
                            event_type = ?payload.event_type,
                            purchase_id = %payload.purchase_id,
                            pro_id = %payload.pro_id,
                            amount = payload.amount_huf,
                            "Lead event (no callback configured)"
                        ),
                    }
                }

                Some(_) = deliveries.join_next(), if !deliveries.is_empty() => {}

                else => {
                    info!("LeadEvent channel closed");
                    break;
                }
            }
        }

        // Deliveries waiting out a backoff observe the shutdown flag and return.
        while deliveries.join_next().await.is_some() {}

        info!("LeadEventNotifier shutdown complete");
    }
}

/// Build the wire payload of `event`.
pub fn payload_for(event: &LeadEvent, timestamp: i64) -> LeadEventPayload {
    let event_type = event.event_type();
    match event {
        LeadEvent::LeadUnlocked {
            purchase_id,
            job_id,
            pro_id,
            amount,
        }
        | LeadEvent::LeadRefunded {
            purchase_id,
            job_id,
            pro_id,
            amount,
        } => LeadEventPayload {
            event_type,
            purchase_id: *purchase_id,
            job_id: *job_id,
            pro_id: *pro_id,
            amount_huf: *amount,
            reason: None,
            timestamp,
        },
        LeadEvent::PurchaseFailed {
            purchase_id,
            job_id,
            pro_id,
            reason,
        } => LeadEventPayload {
            event_type,
            purchase_id: *purchase_id,
            job_id: *job_id,
            pro_id: *pro_id,
            amount_huf: 0,
            reason: Some(reason.clone()),
            timestamp,
        },
    }
}

/// Sign `payload`, returning the JSON body and the signature header value.
pub fn sign_payload(
    payload: LeadEventPayload,
    secret: &[u8],
) -> Result<(String, String), NotifyError> {
    let signed = SignedObject::new(payload, secret)?;
    let header = signed.to_header();
    Ok((signed.json, header))
}

async fn deliver(
    http_client: reqwest::Client,
    url: Url,
    secret: Box<[u8]>,
    max_attempts: u32,
    payload: LeadEventPayload,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let purchase_id = payload.purchase_id;
    let max_attempts = max_attempts.max(1);
    for attempt in 0..max_attempts {
        match send_once(&http_client, &url, &secret, payload.clone()).await {
            Ok(()) => {
                info!(purchase_id = %purchase_id, attempt = attempt, "Lead event delivered");
                return;
            }
            Err(e) => warn!(
                purchase_id = %purchase_id,
                attempt = attempt,
                error = %e,
                "Lead event delivery failed"
            ),
        }
        if attempt + 1 == max_attempts {
            break;
        }
        tokio::select! {
            _ = shutdown_rx.wait_for(|stop| *stop) => {
                warn!(purchase_id = %purchase_id, "Dropping lead event retry on shutdown");
                return;
            }
            _ = tokio::time::sleep(calculate_retry_delay(attempt)) => {}
        }
    }
    error!(purchase_id = %purchase_id, attempts = max_attempts, "Giving up on lead event delivery");
}

async fn send_once(
    http_client: &reqwest::Client,
    url: &Url,
    secret: &[u8],
    payload: LeadEventPayload,
) -> Result<(), NotifyError> {
    // Signed per attempt so the timestamp stays fresh across retries.
    let (body, signature) = sign_payload(payload, secret)?;
    let response = http_client
        .post(url.clone())
        .header("Content-Type", "application/json")
        .header(SIGNATURE_HEADER, signature)
        .body(body)
        .send()
        .await?;

    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(NotifyError::DeliveryFailed {
            status: status.as_u16(),
            body,
        })
    }
}

/// Calculate the next retry delay based on retry count.
///
/// Uses exponential backoff: 2^retry_count seconds.
pub fn calculate_retry_delay(retry_count: u32) -> std::time::Duration {
    let seconds = 2u64.pow(retry_count.min(MAX_RETRY_COUNT));
    std::time::Duration::from_secs(seconds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::lead_event_channel;
    use leadpay_sdk::objects::LeadEventType;
    use uuid::Uuid;

    #[test]
    fn test_retry_delay_calculation() {
        assert_eq!(calculate_retry_delay(0), std::time::Duration::from_secs(1));
        assert_eq!(calculate_retry_delay(3), std::time::Duration::from_secs(8));
        assert_eq!(
            calculate_retry_delay(11),
            std::time::Duration::from_secs(2048)
        );
        assert_eq!(
            calculate_retry_delay(40),
            std::time::Duration::from_secs(2048)
        );
    }

    #[test]
    fn test_failed_event_carries_reason() {
        let event = LeadEvent::PurchaseFailed {
            purchase_id: Uuid::now_v7(),
            job_id: Uuid::now_v7(),
            pro_id: Uuid::now_v7(),
            reason: "declined: insufficient_funds".into(),
        };
        let payload = payload_for(&event, 1_700_000_000);
        assert_eq!(payload.event_type, LeadEventType::PurchaseFailed);
        assert_eq!(payload.amount_huf, 0);
        assert_eq!(
            payload.reason.as_deref(),
            Some("declined: insufficient_funds")
        );
    }

    #[test]
    fn test_signed_payload_verifies() {
        let event = LeadEvent::LeadUnlocked {
            purchase_id: Uuid::now_v7(),
            job_id: Uuid::now_v7(),
            pro_id: Uuid::now_v7(),
            amount: 18_000,
        };
        let payload = payload_for(&event, time::OffsetDateTime::now_utc().unix_timestamp());
        let (body, header) = sign_payload(payload.clone(), b"notifier-secret").unwrap();

        let received: SignedObject<LeadEventPayload> =
            SignedObject::from_header_and_body(&header, body).unwrap();
        assert_eq!(received.verify(b"notifier-secret").unwrap(), payload);
    }

    #[tokio::test]
    async fn test_log_only_mode_drains_events() {
        let config = Arc::new(RwLock::new(NotifierConfig {
            callback_url: None,
            secret: Box::from(&b"secret"[..]),
            max_attempts: 3,
        }));
        let (tx, rx) = lead_event_channel();
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(LeadEventNotifier::new(config, rx, shutdown_rx).run());

        tx.send(LeadEvent::LeadRefunded {
            purchase_id: Uuid::now_v7(),
            job_id: Uuid::now_v7(),
            pro_id: Uuid::now_v7(),
            amount: 5_000,
        })
        .await
        .unwrap();
        drop(tx);

        tokio::time::timeout(std::time::Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
    }
}

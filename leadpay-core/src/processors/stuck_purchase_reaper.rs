//! StuckPurchaseReaper processor.
//!
//! Periodically hands the purchases that stopped moving back to the
//! orchestrator: confirmations nobody finished within the confirmation
//! timeout, and charge claims whose request never returned.

use crate::config::{ConfigStore, RefundPolicy};
use crate::purchase::PurchaseOrchestrator;
use time::OffsetDateTime;
use tokio::sync::watch;
use tracing::{debug, error, info};

pub struct StuckPurchaseReaper {
    orchestrator: PurchaseOrchestrator,
    policy: ConfigStore<RefundPolicy>,
    shutdown_rx: watch::Receiver<bool>,
}

impl StuckPurchaseReaper {
    /// The reaper shares its sweep interval with the refund scheduler.
    pub fn new(
        orchestrator: PurchaseOrchestrator,
        policy: ConfigStore<RefundPolicy>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            orchestrator,
            policy,
            shutdown_rx,
        }
    }

    pub async fn run(mut self) {
        info!("StuckPurchaseReaper started");

        loop {
            let interval = self.policy.read().await.sweep_interval;
            tokio::select! {
                biased;

                _ = self.shutdown_rx.changed() => {
                    if *self.shutdown_rx.borrow() {
                        info!("StuckPurchaseReaper received shutdown signal");
                        break;
                    }
                }

                _ = tokio::time::sleep(interval) => {
                    match self.orchestrator.reap_stuck(OffsetDateTime::now_utc()).await {
                        Ok(report) => debug!(report = ?report, "Reaper sweep completed"),
                        Err(e) => error!(error = %e, "Reaper sweep failed"),
                    }
                }
            }
        }

        info!("StuckPurchaseReaper shutdown complete");
    }
}

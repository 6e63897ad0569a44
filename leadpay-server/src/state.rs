//! Application state shared across all request handlers.

use leadpay_core::config::SharedConfig;
use leadpay_core::events::LeadEventSender;
use leadpay_core::gateway::PaymentGateway;
use leadpay_core::ledger::BalanceLedger;
use leadpay_core::pricing::PricingCalculator;
use leadpay_core::processors::RefundGuaranteeScheduler;
use leadpay_core::purchase::PurchaseOrchestrator;
use leadpay_core::store::SharedStore;
use leadpay_core::vault::PaymentMethodVault;
use std::sync::Arc;

/// Application state that is shared across all request handlers.
///
/// This is cloneable and cheap to pass around (everything is behind Arc).
#[derive(Clone)]
pub struct AppState {
    pub config: SharedConfig,
    pub pricing: PricingCalculator,
    pub ledger: BalanceLedger,
    pub vault: PaymentMethodVault,
    pub orchestrator: PurchaseOrchestrator,
    pub scheduler: RefundGuaranteeScheduler,
}

impl AppState {
    /// Wire every component against one store, one gateway and one event queue.
    pub async fn new(
        config: SharedConfig,
        store: SharedStore,
        gateway: Arc<dyn PaymentGateway>,
        customer_prefix: String,
        events: LeadEventSender,
    ) -> Self {
        let pricing = PricingCalculator::new(config.bands.clone(), config.pricing.clone());
        let ledger = BalanceLedger::new(store.clone());
        let currency = config.pricing.read().await.currency.clone();
        let vault = PaymentMethodVault::new(gateway, customer_prefix, currency);
        let orchestrator = PurchaseOrchestrator::new(
            store.clone(),
            vault.clone(),
            config.purchase.clone(),
            events.clone(),
        );
        let scheduler = RefundGuaranteeScheduler::new(store, config.refund.clone(), events);
        Self {
            config,
            pricing,
            ledger,
            vault,
            orchestrator,
            scheduler,
        }
    }
}

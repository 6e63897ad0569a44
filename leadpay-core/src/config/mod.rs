//! Configuration types for the lead monetization core.
//!
//! These types represent the validated runtime configuration used by the server
//! and can be shared across crates. The actual config loading/parsing is handled
//! by the server crate.

mod config_store;
mod gateway;
mod notifier;
mod policy;
mod server;

pub use config_store::{ConfigStore, ConfigWatcher};
pub use gateway::GatewayConfig;
pub use notifier::NotifierConfig;
pub use policy::{CoveragePolicy, PricingPolicy, PurchasePolicy, RefundPolicy};
pub use server::ServerConfig;

use crate::pricing::BandCatalog;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Shared configuration state with separate locks for each section.
///
/// The sections consulted on every purchase are [`ConfigStore`]s so that the
/// components holding them see SIGHUP reloads without being rebuilt.
#[derive(Clone)]
pub struct SharedConfig {
    pub server: Arc<RwLock<ServerConfig>>,
    pub gateway: Arc<RwLock<GatewayConfig>>,
    pub notifier: Arc<RwLock<NotifierConfig>>,
    pub pricing: ConfigStore<PricingPolicy>,
    pub bands: ConfigStore<BandCatalog>,
    pub purchase: ConfigStore<PurchasePolicy>,
    pub refund: ConfigStore<RefundPolicy>,
}

//! Reloadable business policies.

use compact_str::CompactString;
use serde::{Deserialize, Serialize};
use time::Duration;

/// How much of a lead price the balance has to cover before a purchase may start.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoveragePolicy {
    /// Any shortfall is charged to a payment method.
    #[default]
    Partial,
    /// The balance must cover the whole price; otherwise `InsufficientBalance`.
    Full,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricingPolicy {
    pub currency: CompactString,
    pub quote_ttl: Duration,
}

impl Default for PricingPolicy {
    fn default() -> Self {
        Self {
            currency: CompactString::const_new("HUF"),
            quote_ttl: Duration::minutes(15),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PurchasePolicy {
    /// Gateway charge attempts allowed per purchase before it is failed.
    pub max_gateway_attempts: u32,
    pub coverage: CoveragePolicy,
    /// How long a purchase may wait for gateway confirmation before it is reaped.
    pub confirmation_timeout: Duration,
    /// Money-back window armed on every successful purchase.
    pub refund_window: Duration,
}

impl Default for PurchasePolicy {
    fn default() -> Self {
        Self {
            max_gateway_attempts: 3,
            coverage: CoveragePolicy::Partial,
            confirmation_timeout: Duration::minutes(30),
            refund_window: Duration::hours(48),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefundPolicy {
    pub sweep_interval: std::time::Duration,
    /// Upper bound on timers handled per sweep.
    pub batch_size: usize,
}

impl Default for RefundPolicy {
    fn default() -> Self {
        Self {
            sweep_interval: std::time::Duration::from_secs(60),
            batch_size: 100,
        }
    }
}

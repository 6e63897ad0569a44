//! TOML file configuration structures.
//!
//! These structs directly map to the `leadpay-config.toml` file format.

use leadpay_core::config::CoveragePolicy;
use leadpay_sdk::objects::JobSize;
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use url::Url;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub pricing: PricingConfig,
    #[serde(default)]
    pub price_bands: Vec<PriceBandConfig>,
    #[serde(default)]
    pub purchase: PurchaseConfig,
    #[serde(default)]
    pub refund: RefundConfig,
    pub notifier: NotifierConfig,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The address and port to listen on (e.g., "0.0.0.0:8080").
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::UNSPECIFIED, 8080))
}

/// Payment gateway section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub base_url: Url,
    pub secret_key: String,
    /// Secret the gateway signs webhooks with.
    pub webhook_secret: String,
    #[serde(default = "default_customer_prefix")]
    pub customer_prefix: String,
    #[serde(default = "default_gateway_timeout")]
    pub timeout_secs: u64,
}

fn default_customer_prefix() -> String {
    "cus_".to_owned()
}

fn default_gateway_timeout() -> u64 {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PricingConfig {
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default = "default_quote_ttl")]
    pub quote_ttl_secs: u64,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            currency: default_currency(),
            quote_ttl_secs: default_quote_ttl(),
        }
    }
}

fn default_currency() -> String {
    "HUF".to_owned()
}

fn default_quote_ttl() -> u64 {
    15 * 60
}

/// One `[[price_bands]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceBandConfig {
    pub category: String,
    pub size: JobSize,
    pub base_price: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseConfig {
    #[serde(default = "default_max_attempts")]
    pub max_gateway_attempts: u32,
    #[serde(default = "default_confirmation_timeout")]
    pub confirmation_timeout_secs: u64,
    #[serde(default)]
    pub coverage: CoveragePolicy,
}

impl Default for PurchaseConfig {
    fn default() -> Self {
        Self {
            max_gateway_attempts: default_max_attempts(),
            confirmation_timeout_secs: default_confirmation_timeout(),
            coverage: CoveragePolicy::default(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_confirmation_timeout() -> u64 {
    30 * 60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundConfig {
    #[serde(default = "default_window_hours")]
    pub window_hours: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for RefundConfig {
    fn default() -> Self {
        Self {
            window_hours: default_window_hours(),
            sweep_interval_secs: default_sweep_interval(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_window_hours() -> u64 {
    48
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_batch_size() -> usize {
    100
}

/// Marketplace callback section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifierConfig {
    /// Events are only logged when no callback is configured.
    #[serde(default)]
    pub callback_url: Option<Url>,
    pub secret: String,
    #[serde(default = "default_notify_attempts")]
    pub max_attempts: u32,
}

fn default_notify_attempts() -> u32 {
    8
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_config_parsing() {
        let toml_str = r#"
[server]
listen = "127.0.0.1:3000"

[gateway]
base_url = "https://api.gateway.test/"
secret_key = "sk_test_123"
webhook_secret = "whsec_123"
customer_prefix = "cus_lp_"

[pricing]
currency = "HUF"
quote_ttl_secs = 600

[[price_bands]]
category = "plumbing"
size = "medium"
base_price = 10000

[[price_bands]]
category = "plumbing"
size = "large"
base_price = 16000

[purchase]
max_gateway_attempts = 5
coverage = "full"

[refund]
window_hours = 24

[notifier]
callback_url = "https://marketplace.test/hooks/leads"
secret = "notifier-secret"
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen.port(), 3000);
        assert_eq!(config.gateway.customer_prefix, "cus_lp_");
        assert_eq!(config.gateway.timeout_secs, 20);
        assert_eq!(config.pricing.quote_ttl_secs, 600);
        assert_eq!(config.price_bands.len(), 2);
        assert_eq!(config.price_bands[1].size, JobSize::Large);
        assert_eq!(config.purchase.max_gateway_attempts, 5);
        assert_eq!(config.purchase.confirmation_timeout_secs, 1800);
        assert_eq!(config.purchase.coverage, CoveragePolicy::Full);
        assert_eq!(config.refund.window_hours, 24);
        assert_eq!(config.refund.sweep_interval_secs, 60);
        assert!(config.notifier.callback_url.is_some());
        assert_eq!(config.notifier.max_attempts, 8);
    }

    #[test]
    fn test_minimal_config_uses_defaults() {
        let toml_str = r#"
[gateway]
base_url = "https://api.gateway.test/"
secret_key = "sk"
webhook_secret = "wh"

[notifier]
secret = "s"
"#;
        let config: FileConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.listen.port(), 8080);
        assert_eq!(config.pricing.currency, "HUF");
        assert!(config.price_bands.is_empty());
        assert_eq!(config.purchase.coverage, CoveragePolicy::Partial);
        assert_eq!(config.refund.window_hours, 48);
        assert!(config.notifier.callback_url.is_none());
    }
}

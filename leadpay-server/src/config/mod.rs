//! Configuration module for leadpay-server.
//!
//! Handles loading configuration from TOML files, CLI arguments,
//! and environment variables.

pub mod file;

use crate::config::file::FileConfig;
use leadpay_core::config::{
    ConfigStore, GatewayConfig, NotifierConfig, PricingPolicy, PurchasePolicy, RefundPolicy,
    ServerConfig, SharedConfig,
};
use leadpay_core::pricing::{BandCatalog, PriceBand, PricingError};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("invalid price bands: {0}")]
    PriceBands(#[from] PricingError),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("DATABASE_URL environment variable not set")]
    MissingDatabaseUrl,
}

/// Loaded configuration result containing all parts.
#[derive(Debug)]
pub struct LoadedConfig {
    pub server: ServerConfig,
    pub gateway: GatewayConfig,
    pub notifier: NotifierConfig,
    pub pricing: PricingPolicy,
    pub bands: BandCatalog,
    pub purchase: PurchasePolicy,
    pub refund: RefundPolicy,
}

impl LoadedConfig {
    /// Convert into a SharedConfig with per-section locks.
    pub fn into_shared(self) -> SharedConfig {
        SharedConfig {
            server: Arc::new(RwLock::new(self.server)),
            gateway: Arc::new(RwLock::new(self.gateway)),
            notifier: Arc::new(RwLock::new(self.notifier)),
            pricing: ConfigStore::new(self.pricing),
            bands: ConfigStore::new(self.bands),
            purchase: ConfigStore::new(self.purchase),
            refund: ConfigStore::new(self.refund),
        }
    }

    /// Swap the reloadable sections of `shared` for the ones in `self`.
    ///
    /// The listen address and the gateway connection are only read at
    /// startup and stay as they are.
    pub async fn apply_reload(self, shared: &SharedConfig) {
        *shared.notifier.write().await = self.notifier;
        shared.pricing.update(self.pricing).await;
        shared.bands.update(self.bands).await;
        shared.purchase.update(self.purchase).await;
        shared.refund.update(self.refund).await;
    }
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: std::path::PathBuf,
    listen_override: Option<SocketAddr>,
}

impl ConfigLoader {
    pub fn new(config_path: impl AsRef<Path>, listen_override: Option<SocketAddr>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
        }
    }

    /// Read the TOML file, apply CLI overrides, validate, and build the
    /// runtime configuration.
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        Self::parse(&config_content, self.listen_override)
    }

    /// Reload the configuration (used during SIGHUP).
    pub fn reload(&self) -> Result<LoadedConfig, ConfigError> {
        self.load()
    }

    fn parse(
        content: &str,
        listen_override: Option<SocketAddr>,
    ) -> Result<LoadedConfig, ConfigError> {
        let mut file_config: FileConfig = toml::from_str(content)?;
        if let Some(listen) = listen_override {
            file_config.server.listen = listen;
        }
        validate(&file_config)?;
        build_loaded_config(file_config)
    }
}

fn validate(config: &FileConfig) -> Result<(), ConfigError> {
    let invalid = |msg: &str| Err(ConfigError::ValidationError(msg.to_owned()));
    if config.purchase.max_gateway_attempts == 0 {
        return invalid("purchase.max_gateway_attempts must be at least 1");
    }
    if config.pricing.quote_ttl_secs == 0 {
        return invalid("pricing.quote_ttl_secs must be positive");
    }
    if config.refund.window_hours == 0 {
        return invalid("refund.window_hours must be positive");
    }
    if config.refund.sweep_interval_secs == 0 {
        return invalid("refund.sweep_interval_secs must be positive");
    }
    if config.refund.batch_size == 0 {
        return invalid("refund.batch_size must be positive");
    }
    if config.gateway.webhook_secret.is_empty() || config.notifier.secret.is_empty() {
        return invalid("gateway.webhook_secret and notifier.secret must not be empty");
    }
    Ok(())
}

fn build_loaded_config(file: FileConfig) -> Result<LoadedConfig, ConfigError> {
    let currency = file.pricing.currency.as_str();
    let bands = BandCatalog::new(
        file.price_bands
            .iter()
            .map(|b| PriceBand::new(b.category.as_str(), b.size, b.base_price, currency)),
    )?;
    if bands.is_empty() {
        tracing::warn!("No price bands configured; every quote will fail");
    }

    Ok(LoadedConfig {
        server: ServerConfig {
            listen: file.server.listen,
        },
        gateway: GatewayConfig {
            base_url: file.gateway.base_url,
            secret_key: file.gateway.secret_key,
            webhook_secret: file.gateway.webhook_secret.into_bytes().into_boxed_slice(),
            customer_prefix: file.gateway.customer_prefix,
            timeout: std::time::Duration::from_secs(file.gateway.timeout_secs),
        },
        notifier: NotifierConfig {
            callback_url: file.notifier.callback_url,
            secret: file.notifier.secret.into_bytes().into_boxed_slice(),
            max_attempts: file.notifier.max_attempts,
        },
        pricing: PricingPolicy {
            currency: file.pricing.currency.as_str().into(),
            quote_ttl: secs(file.pricing.quote_ttl_secs),
        },
        bands,
        purchase: PurchasePolicy {
            max_gateway_attempts: file.purchase.max_gateway_attempts,
            coverage: file.purchase.coverage,
            confirmation_timeout: secs(file.purchase.confirmation_timeout_secs),
            refund_window: secs(file.refund.window_hours.saturating_mul(3600)),
        },
        refund: RefundPolicy {
            sweep_interval: std::time::Duration::from_secs(file.refund.sweep_interval_secs),
            batch_size: file.refund.batch_size,
        },
    })
}

fn secs(value: u64) -> time::Duration {
    time::Duration::seconds(i64::try_from(value).unwrap_or(i64::MAX))
}

/// Get the database URL from the environment.
pub fn get_database_url() -> Result<String, ConfigError> {
    std::env::var("DATABASE_URL").map_err(|_| ConfigError::MissingDatabaseUrl)
}

#[cfg(test)]
mod tests {
    use super::*;
    use leadpay_core::config::CoveragePolicy;
    use leadpay_sdk::objects::JobSize;

    const BASE: &str = r#"
[gateway]
base_url = "https://api.gateway.test/"
secret_key = "sk"
webhook_secret = "wh"

[notifier]
secret = "s"
"#;

    fn with(extra: &str) -> String {
        format!("{BASE}\n{extra}")
    }

    #[test]
    fn test_builds_runtime_config() {
        let loaded = ConfigLoader::parse(
            &with(
                r#"
[[price_bands]]
category = "plumbing"
size = "medium"
base_price = 10000

[purchase]
coverage = "full"

[refund]
window_hours = 24
"#,
            ),
            Some("127.0.0.1:9999".parse().unwrap()),
        )
        .unwrap();

        assert_eq!(loaded.server.listen.port(), 9999);
        let band = loaded.bands.lookup("plumbing", JobSize::Medium).unwrap();
        assert_eq!(band.base_price, 10_000);
        assert_eq!(band.currency, "HUF");
        assert_eq!(loaded.purchase.coverage, CoveragePolicy::Full);
        assert_eq!(loaded.purchase.refund_window, time::Duration::hours(24));
        assert_eq!(&*loaded.gateway.webhook_secret, b"wh");
    }

    #[test]
    fn test_rejects_duplicate_bands() {
        let err = ConfigLoader::parse(
            &with(
                r#"
[[price_bands]]
category = "plumbing"
size = "medium"
base_price = 10000

[[price_bands]]
category = "plumbing"
size = "medium"
base_price = 12000
"#,
            ),
            None,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::PriceBands(PricingError::DuplicateBand(_))
        ));
    }

    #[test]
    fn test_rejects_non_positive_price() {
        let err = ConfigLoader::parse(
            &with(
                r#"
[[price_bands]]
category = "roofing"
size = "small"
base_price = 0
"#,
            ),
            None,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::PriceBands(PricingError::NonPositiveBasePrice { .. })
        ));
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let err = ConfigLoader::parse(
            &with(
                r#"
[purchase]
max_gateway_attempts = 0
"#,
            ),
            None,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }
}

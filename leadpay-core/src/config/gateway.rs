//! Payment gateway connection settings.

use url::Url;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Root of the PaymentIntents API, e.g. `https://api.stripe.com/`.
    pub base_url: Url,
    /// Bearer secret for API calls.
    pub secret_key: String,
    /// HMAC key the gateway signs its webhooks with.
    pub webhook_secret: Box<[u8]>,
    /// Prefix of the gateway customer id; the full id is `{prefix}{pro_id}`.
    pub customer_prefix: String,
    pub timeout: std::time::Duration,
}

impl GatewayConfig {
    pub fn webhook_secret_bytes(&self) -> &[u8] {
        &self.webhook_secret
    }
}

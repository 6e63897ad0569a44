use url::Url;

/// Where lead events are delivered. Events are only logged when
/// `callback_url` is `None`.
#[derive(Debug, Clone)]
pub struct NotifierConfig {
    pub callback_url: Option<Url>,
    pub secret: Box<[u8]>,
    pub max_attempts: u32,
}

impl NotifierConfig {
    pub fn secret_bytes(&self) -> &[u8] {
        &self.secret
    }
}

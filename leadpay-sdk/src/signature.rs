//! HMAC-SHA256 signatures for webhook traffic in both directions.
//!
//! The wire format for the header is:
//!
//! ```text
//! Leadpay-Signature: {unix_timestamp}.{base64_signature}
//! ```
//!
//! The signed data is always `"{timestamp}.{json_body}"`. Outgoing lead events
//! are signed with the notifier secret; incoming gateway events carry the same
//! format in [`GATEWAY_SIGNATURE_HEADER`] and are checked against the gateway
//! webhook secret.

use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;

/// Header carrying the signature of outgoing lead events.
pub const SIGNATURE_HEADER: &str = "Leadpay-Signature";

/// Header carrying the signature of incoming gateway events.
pub const GATEWAY_SIGNATURE_HEADER: &str = "Leadpay-Gateway-Signature";

/// Maximum allowed age of a signature (in seconds).
pub const MAX_SIGNATURE_AGE: i64 = 5 * 60;

/// Marker trait for types that can participate in body signing via
/// [`SignedObject`].
pub trait Signature: for<'de> serde::Deserialize<'de> + serde::Serialize {}

#[derive(Debug, thiserror::Error)]
pub enum SignatureError {
    #[error("invalid header format")]
    InvalidFormat,
    #[error("invalid base64 encoding")]
    InvalidBase64,
    #[error("invalid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid signature")]
    SignatureMismatch,
    #[error("signature expired")]
    Expired,
}

impl From<ring::error::Unspecified> for SignatureError {
    fn from(_: ring::error::Unspecified) -> Self {
        Self::SignatureMismatch
    }
}

/// A signed body carrying its typed payload, timestamp, raw JSON, and
/// HMAC-SHA256 signature.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedObject<T: Signature> {
    pub body: T,
    pub timestamp: i64,
    pub json: String,
    pub signature: Box<[u8]>,
}

impl<T: Signature> SignedObject<T> {
    /// Serialize `body` and sign it with the current time.
    pub fn new(body: T, key: &[u8]) -> Result<Self, serde_json::Error> {
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        Self::new_at(body, key, now)
    }

    /// Serialize `body` and sign it as of `timestamp`.
    pub fn new_at(body: T, key: &[u8], timestamp: i64) -> Result<Self, serde_json::Error> {
        let json = serde_json::to_string(&body)?;
        let signature = sign(key, timestamp, &json);
        Ok(Self {
            body,
            timestamp,
            json,
            signature,
        })
    }

    /// Reconstruct a [`SignedObject`] from a raw signature header value and
    /// the JSON body. The HMAC is **not** checked here; call
    /// [`verify`](Self::verify) for that.
    pub fn from_header_and_body(
        header_value: &str,
        body_json: String,
    ) -> Result<Self, SignatureError> {
        let (timestamp, signature) = parse_signature_header(header_value)?;
        let body: T = serde_json::from_str(&body_json)?;
        Ok(Self {
            body,
            timestamp,
            json: body_json,
            signature,
        })
    }

    /// Verify the HMAC and timestamp freshness, returning the authenticated payload.
    pub fn verify(self, key: &[u8]) -> Result<T, SignatureError> {
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        self.verify_at(key, now)
    }

    pub fn verify_at(self, key: &[u8], now: i64) -> Result<T, SignatureError> {
        let data = format!("{}.{}", self.timestamp, self.json);
        ring::hmac::verify(
            &ring::hmac::Key::new(ring::hmac::HMAC_SHA256, key),
            data.as_bytes(),
            self.signature.as_ref(),
        )?;
        check_timestamp(self.timestamp, now)?;
        Ok(self.body)
    }

    /// Format the full header value (`{timestamp}.{b64}`).
    pub fn to_header(&self) -> String {
        format_signature_header(self.timestamp, &self.signature)
    }
}

fn sign(key: &[u8], timestamp: i64, json: &str) -> Box<[u8]> {
    let data = format!("{timestamp}.{json}");
    let signature = ring::hmac::sign(
        &ring::hmac::Key::new(ring::hmac::HMAC_SHA256, key),
        data.as_bytes(),
    );
    signature.as_ref().to_owned().into_boxed_slice()
}

/// Parse a `{timestamp}.{base64}` header value into
/// `(timestamp, raw_signature_bytes)`.
pub fn parse_signature_header(value: &str) -> Result<(i64, Box<[u8]>), SignatureError> {
    let (timestamp, encoded) = value.split_once('.').ok_or(SignatureError::InvalidFormat)?;
    let timestamp: i64 = timestamp
        .parse()
        .map_err(|_| SignatureError::InvalidFormat)?;
    let signature_bytes = STANDARD_NO_PAD
        .decode(encoded)
        .map_err(|_| SignatureError::InvalidBase64)?
        .into_boxed_slice();
    Ok((timestamp, signature_bytes))
}

/// Format a `{timestamp}.{base64}` header value from its parts.
pub fn format_signature_header(timestamp: i64, signature: &[u8]) -> String {
    format!("{}.{}", timestamp, STANDARD_NO_PAD.encode(signature))
}

/// Check that a signature timestamp is within [`MAX_SIGNATURE_AGE`] of `now`.
pub fn check_timestamp(timestamp: i64, now: i64) -> Result<(), SignatureError> {
    if now - timestamp > MAX_SIGNATURE_AGE {
        return Err(SignatureError::Expired);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::objects::{LeadEventPayload, LeadEventType};
    use uuid::Uuid;

    fn payload() -> LeadEventPayload {
        LeadEventPayload {
            event_type: LeadEventType::LeadUnlocked,
            purchase_id: Uuid::nil(),
            job_id: Uuid::nil(),
            pro_id: Uuid::nil(),
            amount_huf: 18_000,
            reason: None,
            timestamp: 1_700_000_000,
        }
    }

    #[test]
    fn test_header_round_trip_verifies() {
        let key = b"notifier-secret";
        let signed = SignedObject::new_at(payload(), key, 1_700_000_000).unwrap();
        let header = signed.to_header();
        assert!(header.starts_with("1700000000."));

        let parsed =
            SignedObject::<LeadEventPayload>::from_header_and_body(&header, signed.json.clone())
                .unwrap();
        let body = parsed.verify_at(key, 1_700_000_010).unwrap();
        assert_eq!(body, payload());
    }

    #[test]
    fn test_wrong_key_is_rejected() {
        let signed = SignedObject::new_at(payload(), b"right", 1_700_000_000).unwrap();
        let result = signed.verify_at(b"wrong", 1_700_000_000);
        assert!(matches!(result, Err(SignatureError::SignatureMismatch)));
    }

    #[test]
    fn test_tampered_body_is_rejected() {
        let key = b"secret";
        let signed = SignedObject::new_at(payload(), key, 1_700_000_000).unwrap();
        let tampered = signed.json.replace("18000", "1");
        let parsed =
            SignedObject::<LeadEventPayload>::from_header_and_body(&signed.to_header(), tampered)
                .unwrap();
        assert!(parsed.verify_at(key, 1_700_000_000).is_err());
    }

    #[test]
    fn test_expired_signature() {
        let key = b"secret";
        let signed = SignedObject::new_at(payload(), key, 1_700_000_000).unwrap();
        let result = signed.verify_at(key, 1_700_000_000 + MAX_SIGNATURE_AGE + 1);
        assert!(matches!(result, Err(SignatureError::Expired)));
    }

    #[test]
    fn test_malformed_headers() {
        assert!(matches!(
            parse_signature_header("no-dot-here"),
            Err(SignatureError::InvalidFormat)
        ));
        assert!(matches!(
            parse_signature_header("abc.AAAA"),
            Err(SignatureError::InvalidFormat)
        ));
        assert!(matches!(
            parse_signature_header("1700000000.!!!"),
            Err(SignatureError::InvalidBase64)
        ));
    }
}

use chrono::{DateTime, Utc};
use ring::hmac;
use thiserror::Error;

pub const SIGNATURE_HEADER: &str = "stripe-signature";
pub const DEFAULT_TOLERANCE_SECONDS: i64 = 300;

const SCHEME: &str = "v1";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WebhookError {
    #[error("Malformed signature header")]
    MalformedHeader,

    #[error("Signature header has no v1 signatures")]
    NoSignatures,

    #[error("Timestamp outside the tolerance window")]
    TimestampOutOfTolerance,

    #[error("No signature matches the payload")]
    SignatureMismatch,
}

/// Verifies payment-processor webhook deliveries.
///
/// The header has the form `t=<unix seconds>,v1=<hex>[,v1=<hex>...]`. The
/// signed payload is `"{t}.{raw body}"` under HMAC-SHA256 with the endpoint
/// secret.
pub struct WebhookVerifier {
    key: hmac::Key,
    tolerance_seconds: i64,
}

impl WebhookVerifier {
    pub fn new(secret: &str) -> Self {
        Self::with_tolerance(secret, DEFAULT_TOLERANCE_SECONDS)
    }

    pub fn with_tolerance(secret: &str, tolerance_seconds: i64) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret.as_bytes()),
            tolerance_seconds,
        }
    }

    pub fn verify(&self, header: &str, payload: &[u8]) -> Result<(), WebhookError> {
        self.verify_at(header, payload, Utc::now())
    }

    pub fn verify_at(&self, header: &str, payload: &[u8], now: DateTime<Utc>) -> Result<(), WebhookError> {
        let parsed = parse_signature_header(header)?;

        if now.timestamp().abs_diff(parsed.timestamp) > self.tolerance_seconds.unsigned_abs() {
            return Err(WebhookError::TimestampOutOfTolerance);
        }

        let signed_payload = signed_payload(parsed.timestamp, payload);
        let matched = parsed
            .signatures
            .iter()
            .filter_map(|candidate| hex::decode(candidate).ok())
            .any(|candidate| hmac::verify(&self.key, &signed_payload, &candidate).is_ok());

        if matched {
            Ok(())
        } else {
            tracing::warn!("Webhook signature did not match any {} candidate", SCHEME);
            Err(WebhookError::SignatureMismatch)
        }
    }

    /// Builds a header value the way the processor does. Used by tests and
    /// local replay tooling.
    pub fn sign(&self, timestamp: i64, payload: &[u8]) -> String {
        let tag = hmac::sign(&self.key, &signed_payload(timestamp, payload));
        format!("t={},{}={}", timestamp, SCHEME, hex::encode(tag.as_ref()))
    }
}

struct SignatureHeader {
    timestamp: i64,
    signatures: Vec<String>,
}

fn parse_signature_header(header: &str) -> Result<SignatureHeader, WebhookError> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for item in header.split(',') {
        let Some((name, value)) = item.trim().split_once('=') else {
            continue;
        };
        match name {
            "t" => {
                timestamp = Some(value.parse::<i64>().map_err(|_| WebhookError::MalformedHeader)?);
            }
            SCHEME => signatures.push(value.to_string()),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or(WebhookError::MalformedHeader)?;
    if signatures.is_empty() {
        return Err(WebhookError::NoSignatures);
    }

    Ok(SignatureHeader {
        timestamp,
        signatures,
    })
}

fn signed_payload(timestamp: i64, payload: &[u8]) -> Vec<u8> {
    let mut signed = format!("{}.", timestamp).into_bytes();
    signed.extend_from_slice(payload);
    signed
}

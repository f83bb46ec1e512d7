//! HMAC-SHA256 verification of webhook deliveries.
//!
//! Accepted signature header formats:
//! - `sha256=<hex>`
//! - `v1=<hex>`
//! - `<hex>` (64 hex characters)
//! - `t=<unix seconds>,v1=<hex>[,v1=<hex>...]`, where the signed content is
//!   `"{t}.{body}"` and the timestamp must fall within the tolerance window
//!
//! Digest comparison goes through [`Mac::verify_slice`], which is constant
//! time.

use std::{collections::HashMap, time::Duration};

use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Why a signature was rejected. Never shown to the sender.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// No signature header was sent.
    #[error("signature header missing")]
    Missing,

    /// Header could not be parsed.
    #[error("invalid signature format: {0}")]
    InvalidFormat(String),

    /// No secret is configured for the source.
    #[error("no secret configured for source {0}")]
    NoSecret(String),

    /// Timestamped signature outside the tolerance window.
    #[error("signature timestamp {age_seconds}s old exceeds {tolerance_seconds}s tolerance")]
    StaleTimestamp {
        /// Absolute distance between the timestamp and now
        age_seconds: u64,
        /// Configured tolerance
        tolerance_seconds: u64,
    },

    /// Digest did not match.
    #[error("signature verification failed")]
    Mismatch,

    /// Secret could not be used as an HMAC key.
    #[error("invalid secret key")]
    InvalidSecret,
}

/// Parsed signature header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedSignature {
    /// Timestamp for the `t=...,v1=...` form.
    pub timestamp: Option<i64>,
    /// Candidate digests; any match is accepted.
    pub digests: Vec<Vec<u8>>,
}

/// Parses a signature header into its timestamp and digests.
///
/// # Errors
///
/// Returns `SignatureError::InvalidFormat` if the header matches none of the
/// accepted formats or carries invalid hex.
pub fn parse_signature(header: &str) -> Result<ParsedSignature, SignatureError> {
    let header = header.trim();
    if header.is_empty() {
        return Err(SignatureError::Missing);
    }

    if header.starts_with("t=") {
        return parse_timestamped(header);
    }

    let hex_digest = header
        .strip_prefix("sha256=")
        .or_else(|| header.strip_prefix("v1="))
        .unwrap_or(header);

    Ok(ParsedSignature { timestamp: None, digests: vec![decode_digest(hex_digest)?] })
}

fn parse_timestamped(header: &str) -> Result<ParsedSignature, SignatureError> {
    let mut timestamp = None;
    let mut digests = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => {
                let parsed = value.parse::<i64>().map_err(|_| {
                    SignatureError::InvalidFormat(format!("timestamp is not an integer: {value}"))
                })?;
                timestamp = Some(parsed);
            },
            Some(("v1", value)) => digests.push(decode_digest(value)?),
            // Unknown schemes (v0 and friends) are ignored.
            Some(_) => {},
            None => {
                return Err(SignatureError::InvalidFormat(format!("malformed element: {part}")))
            },
        }
    }

    if digests.is_empty() {
        return Err(SignatureError::InvalidFormat("no v1 signature present".to_string()));
    }
    Ok(ParsedSignature { timestamp, digests })
}

fn decode_digest(hex_digest: &str) -> Result<Vec<u8>, SignatureError> {
    if hex_digest.len() != 64 {
        return Err(SignatureError::InvalidFormat(format!(
            "expected 64 hex characters, got {}",
            hex_digest.len()
        )));
    }
    hex::decode(hex_digest)
        .map_err(|e| SignatureError::InvalidFormat(format!("invalid hex digest: {e}")))
}

/// Computes the lowercase hex HMAC-SHA256 of `payload`.
///
/// # Errors
///
/// Returns `SignatureError::InvalidSecret` if the secret is not a usable key.
pub fn sign(payload: &[u8], secret: &str) -> Result<String, SignatureError> {
    Ok(hex::encode(mac(secret, None, payload)?.finalize().into_bytes()))
}

/// Builds a `t=<timestamp>,v1=<hex>` header for `payload`.
///
/// # Errors
///
/// Returns `SignatureError::InvalidSecret` if the secret is not a usable key.
pub fn sign_timestamped(
    payload: &[u8],
    secret: &str,
    timestamp: i64,
) -> Result<String, SignatureError> {
    let digest = hex::encode(mac(secret, Some(timestamp), payload)?.finalize().into_bytes());
    Ok(format!("t={timestamp},v1={digest}"))
}

fn mac(secret: &str, timestamp: Option<i64>, payload: &[u8]) -> Result<HmacSha256, SignatureError> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .map_err(|_| SignatureError::InvalidSecret)?;
    if let Some(timestamp) = timestamp {
        mac.update(timestamp.to_string().as_bytes());
        mac.update(b".");
    }
    mac.update(payload);
    Ok(mac)
}

/// Verifies deliveries against the shared secret or a per-source secret.
#[derive(Debug, Clone)]
pub struct SignatureVerifier {
    shared_secret: String,
    source_secrets: HashMap<String, String>,
    tolerance: Duration,
}

impl SignatureVerifier {
    /// Creates a verifier using `shared_secret` for every source.
    pub fn new(shared_secret: impl Into<String>, tolerance: Duration) -> Self {
        Self { shared_secret: shared_secret.into(), source_secrets: HashMap::new(), tolerance }
    }

    /// Overrides the secret for one source.
    #[must_use]
    pub fn with_source_secret(
        mut self,
        source: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        self.source_secrets.insert(source.into(), secret.into());
        self
    }

    fn secret_for(&self, source: &str) -> &str {
        self.source_secrets.get(source).map_or(self.shared_secret.as_str(), String::as_str)
    }

    /// Verifies `header` over `payload` for `source` at time `now`.
    ///
    /// # Errors
    ///
    /// Returns the specific `SignatureError`; callers collapse it into a
    /// single opaque rejection.
    pub fn verify(
        &self,
        source: &str,
        payload: &[u8],
        header: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<(), SignatureError> {
        let secret = self.secret_for(source);
        if secret.is_empty() {
            return Err(SignatureError::NoSecret(source.to_string()));
        }

        let parsed = parse_signature(header.ok_or(SignatureError::Missing)?)?;

        if let Some(timestamp) = parsed.timestamp {
            let age_seconds = now.timestamp().abs_diff(timestamp);
            if age_seconds > self.tolerance.as_secs() {
                return Err(SignatureError::StaleTimestamp {
                    age_seconds,
                    tolerance_seconds: self.tolerance.as_secs(),
                });
            }
        }

        let expected = mac(secret, parsed.timestamp, payload)?;
        let matched =
            parsed.digests.iter().any(|digest| expected.clone().verify_slice(digest).is_ok());

        if matched {
            Ok(())
        } else {
            Err(SignatureError::Mismatch)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";

    fn verifier() -> SignatureVerifier {
        SignatureVerifier::new(SECRET, Duration::from_secs(300))
    }

    #[test]
    fn accepts_all_plain_formats() {
        let payload = br#"{"event_id":"evt_1"}"#;
        let digest = sign(payload, SECRET).unwrap();
        let now = Utc::now();

        for header in [format!("sha256={digest}"), format!("v1={digest}"), digest.clone()] {
            assert_eq!(verifier().verify("crm", payload, Some(&header), now), Ok(()));
        }
    }

    #[test]
    fn rejects_tampered_payload() {
        let header = format!("sha256={}", sign(b"original", SECRET).unwrap());

        let result = verifier().verify("crm", b"tampered", Some(&header), Utc::now());

        assert_eq!(result, Err(SignatureError::Mismatch));
    }

    #[test]
    fn rejects_missing_header_and_empty_secret() {
        assert_eq!(verifier().verify("crm", b"x", None, Utc::now()), Err(SignatureError::Missing));

        let unconfigured = SignatureVerifier::new("", Duration::from_secs(300));
        let header = sign(b"x", "").unwrap();
        assert!(matches!(
            unconfigured.verify("crm", b"x", Some(&header), Utc::now()),
            Err(SignatureError::NoSecret(_))
        ));
    }

    #[test]
    fn per_source_secret_overrides_shared() {
        let verifier = verifier().with_source_secret("billing", "billing_secret");
        let payload = b"{}";

        let shared = sign(payload, SECRET).unwrap();
        let dedicated = sign(payload, "billing_secret").unwrap();

        assert_eq!(verifier.verify("crm", payload, Some(&shared), Utc::now()), Ok(()));
        assert_eq!(verifier.verify("billing", payload, Some(&dedicated), Utc::now()), Ok(()));
        assert_eq!(
            verifier.verify("billing", payload, Some(&shared), Utc::now()),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn timestamped_signature_within_tolerance() {
        let now = Utc::now();
        let header = sign_timestamped(b"body", SECRET, now.timestamp() - 60).unwrap();

        assert_eq!(verifier().verify("crm", b"body", Some(&header), now), Ok(()));
    }

    #[test]
    fn timestamped_signature_replay_rejected() {
        let now = Utc::now();
        let header = sign_timestamped(b"body", SECRET, now.timestamp() - 301).unwrap();

        assert!(matches!(
            verifier().verify("crm", b"body", Some(&header), now),
            Err(SignatureError::StaleTimestamp { age_seconds: 301, .. })
        ));
    }

    #[test]
    fn timestamp_is_part_of_signed_content() {
        let now = Utc::now();
        let header = sign_timestamped(b"body", SECRET, now.timestamp()).unwrap();
        let forged = header.replacen(
            &format!("t={}", now.timestamp()),
            &format!("t={}", now.timestamp() - 1),
            1,
        );

        assert_eq!(
            verifier().verify("crm", b"body", Some(&forged), now),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn any_rotated_v1_digest_matches() {
        let now = Utc::now();
        let valid = sign_timestamped(b"body", SECRET, now.timestamp()).unwrap();
        let header = format!("{},v1={}", valid, "0".repeat(64));

        assert_eq!(verifier().verify("crm", b"body", Some(&header), now), Ok(()));
    }

    #[test]
    fn malformed_headers_rejected() {
        assert!(matches!(parse_signature("sha256=abc"), Err(SignatureError::InvalidFormat(_))));
        assert!(matches!(parse_signature("t=abc,v1=00"), Err(SignatureError::InvalidFormat(_))));
        assert!(matches!(parse_signature("t=1700000000"), Err(SignatureError::InvalidFormat(_))));
        assert!(matches!(parse_signature(&"z".repeat(64)), Err(SignatureError::InvalidFormat(_))));
        assert_eq!(parse_signature("   "), Err(SignatureError::Missing));
    }
}

//! HMAC-SHA256 signing and verification
//!
//! Two schemes share this module:
//! - Payment-provider webhooks: header `t=<unix secs>,v1=<hex>` over `"{t}.{raw body}"`
//! - Signed image URLs: `{key}?expires=<unix secs>&sig=<hex>` over `"{key}:{expires}"`
//!
//! # Pure Functions
//!
//! No HTTP framework or database dependencies. Callers supply `now` so that
//! verification is deterministic under test.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Signature verification failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignatureError {
    /// No signature supplied
    #[error("Missing signature")]
    Missing,

    /// Header or query could not be parsed
    #[error("Malformed signature: {0}")]
    Malformed(String),

    /// Webhook timestamp outside the accepted window
    #[error("Timestamp {timestamp} outside tolerance (now {now})")]
    OutsideTolerance { timestamp: i64, now: i64 },

    /// Signed URL past its expiry
    #[error("Signed URL expired at {expires} (now {now})")]
    Expired { expires: i64, now: i64 },

    /// Signature does not match the payload
    #[error("Signature mismatch")]
    Mismatch,
}

/// Parsed `t=...,v1=...` webhook signature header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignatureHeader {
    pub timestamp: i64,
    /// All `v1` entries; providers send several while rotating secrets
    pub signatures: Vec<String>,
}

fn new_mac(secret: &str) -> HmacSha256 {
    // HMAC accepts keys of any length, so this cannot fail
    match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => unreachable!("HMAC accepts keys of any length"),
    }
}

/// Parse a webhook signature header
///
/// Unknown schemes (`v0=...`) are ignored. At least one `v1` entry and
/// a numeric `t` are required.
pub fn parse_signature_header(header: &str) -> Result<SignatureHeader, SignatureError> {
    let header = header.trim();
    if header.is_empty() {
        return Err(SignatureError::Missing);
    }

    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        let Some((key, value)) = part.trim().split_once('=') else {
            continue;
        };
        match key {
            "t" => {
                timestamp = Some(value.parse::<i64>().map_err(|_| {
                    SignatureError::Malformed(format!("non-numeric timestamp: {}", value))
                })?)
            }
            "v1" => signatures.push(value.to_string()),
            _ => {}
        }
    }

    let timestamp =
        timestamp.ok_or_else(|| SignatureError::Malformed("missing timestamp".to_string()))?;
    if signatures.is_empty() {
        return Err(SignatureError::Malformed("missing v1 signature".to_string()));
    }

    Ok(SignatureHeader {
        timestamp,
        signatures,
    })
}

/// Compute the hex `v1` signature for a webhook payload
///
/// # Examples
///
/// ```
/// use nubcheck_common::signing::compute_webhook_signature;
///
/// let sig = compute_webhook_signature(b"{}", "whsec_test", 1_700_000_000);
/// assert_eq!(sig.len(), 64);
/// ```
pub fn compute_webhook_signature(payload: &[u8], secret: &str, timestamp: i64) -> String {
    let mut mac = new_mac(secret);
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a webhook delivery against its signature header
///
/// Rejects timestamps more than `tolerance_secs` away from `now` in either
/// direction. Comparison is constant-time.
pub fn verify_webhook_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    tolerance_secs: i64,
    now: i64,
) -> Result<(), SignatureError> {
    let parsed = parse_signature_header(header)?;

    let skew = now.checked_sub(parsed.timestamp).map(i64::unsigned_abs);
    if skew.map_or(true, |skew| skew > tolerance_secs.unsigned_abs()) {
        return Err(SignatureError::OutsideTolerance {
            timestamp: parsed.timestamp,
            now,
        });
    }

    let mut mac = new_mac(secret);
    mac.update(parsed.timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);

    let matched = parsed.signatures.iter().any(|candidate| {
        hex::decode(candidate)
            .map(|bytes| mac.clone().verify_slice(&bytes).is_ok())
            .unwrap_or(false)
    });

    if matched {
        Ok(())
    } else {
        Err(SignatureError::Mismatch)
    }
}

/// Sign an image key for read access until `expires` (unix seconds)
pub fn sign_url(key: &str, expires: i64, secret: &str) -> String {
    let mut mac = new_mac(secret);
    mac.update(key.as_bytes());
    mac.update(b":");
    mac.update(expires.to_string().as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a signed image URL
pub fn verify_url_signature(
    key: &str,
    expires: i64,
    signature: &str,
    secret: &str,
    now: i64,
) -> Result<(), SignatureError> {
    if signature.is_empty() {
        return Err(SignatureError::Missing);
    }
    if now > expires {
        return Err(SignatureError::Expired { expires, now });
    }

    let bytes = hex::decode(signature)
        .map_err(|_| SignatureError::Malformed("signature is not hex".to_string()))?;

    let mut mac = new_mac(secret);
    mac.update(key.as_bytes());
    mac.update(b":");
    mac.update(expires.to_string().as_bytes());
    mac.verify_slice(&bytes).map_err(|_| SignatureError::Mismatch)
}

/// Constant-time string comparison for shared-secret headers and tokens
pub fn secrets_match(provided: &str, expected: &str) -> bool {
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test123secret456";
    const NOW: i64 = 1_730_000_000;

    fn header_for(payload: &[u8], secret: &str, timestamp: i64) -> String {
        format!(
            "t={},v1={}",
            timestamp,
            compute_webhook_signature(payload, secret, timestamp)
        )
    }

    #[test]
    fn test_valid_signature_accepted() {
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let header = header_for(payload, SECRET, NOW);
        assert!(verify_webhook_signature(payload, &header, SECRET, 300, NOW).is_ok());
    }

    #[test]
    fn test_tampered_body_rejected() {
        let payload = br#"{"type":"checkout.session.completed"}"#;
        let header = header_for(payload, SECRET, NOW);
        let tampered = br#"{"type":"charge.refunded"}"#;
        assert_eq!(
            verify_webhook_signature(tampered, &header, SECRET, 300, NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let payload = b"{}";
        let header = header_for(payload, "wrong_secret", NOW);
        assert_eq!(
            verify_webhook_signature(payload, &header, SECRET, 300, NOW),
            Err(SignatureError::Mismatch)
        );
    }

    #[test]
    fn test_old_timestamp_rejected() {
        let payload = b"{}";
        let header = header_for(payload, SECRET, NOW - 600);
        assert!(matches!(
            verify_webhook_signature(payload, &header, SECRET, 300, NOW),
            Err(SignatureError::OutsideTolerance { .. })
        ));
    }

    #[test]
    fn test_extreme_timestamps_rejected() {
        for header in [
            "t=-9223372036854775808,v1=00",
            "t=9223372036854775807,v1=00",
        ] {
            assert!(matches!(
                verify_webhook_signature(b"{}", header, SECRET, 300, NOW),
                Err(SignatureError::OutsideTolerance { .. })
            ));
        }
        assert!(matches!(
            verify_webhook_signature(b"{}", "t=0,v1=00", SECRET, 300, i64::MIN),
            Err(SignatureError::OutsideTolerance { .. })
        ));
    }

    #[test]
    fn test_any_v1_entry_may_match() {
        let payload = b"{}";
        let good = compute_webhook_signature(payload, SECRET, NOW);
        let header = format!("t={},v1={},v1={},v0=ignored", NOW, "00".repeat(32), good);
        assert!(verify_webhook_signature(payload, &header, SECRET, 300, NOW).is_ok());
    }

    #[test]
    fn test_malformed_headers() {
        assert_eq!(parse_signature_header(""), Err(SignatureError::Missing));
        assert!(matches!(
            parse_signature_header("v1=abc"),
            Err(SignatureError::Malformed(_))
        ));
        assert!(matches!(
            parse_signature_header("t=123"),
            Err(SignatureError::Malformed(_))
        ));
        assert!(matches!(
            parse_signature_header("t=abc,v1=00"),
            Err(SignatureError::Malformed(_))
        ));
    }

    #[test]
    fn test_signed_url_round_trip_and_expiry() {
        let key = "ultrasounds/1730000000000-abc.jpg";
        let sig = sign_url(key, NOW + 60, "img-secret");

        assert!(verify_url_signature(key, NOW + 60, &sig, "img-secret", NOW).is_ok());
        assert_eq!(
            verify_url_signature("ultrasounds/other.jpg", NOW + 60, &sig, "img-secret", NOW),
            Err(SignatureError::Mismatch)
        );
        assert!(matches!(
            verify_url_signature(key, NOW + 60, &sig, "img-secret", NOW + 61),
            Err(SignatureError::Expired { .. })
        ));
    }

    #[test]
    fn test_secrets_match() {
        assert!(secrets_match("abc", "abc"));
        assert!(!secrets_match("abc", "abd"));
        assert!(!secrets_match("abc", "abcd"));
        assert!(!secrets_match("", "abc"));
    }
}

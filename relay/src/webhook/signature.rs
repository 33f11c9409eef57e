//! Webhook payload signing.
//!
//! Each request body is signed with HMAC-SHA256 keyed by the subscriber's
//! shared secret. The lowercase hex digest travels in the `Mw-Signature`
//! header so the subscriber can recompute it over the exact body bytes.

use hmac::digest::InvalidLength;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

type HmacSha256 = Hmac<Sha256>;

/// Sign a serialized payload.
///
/// # Arguments
///
/// * `secret` - The subscriber's shared webhook secret
/// * `body` - The exact bytes sent as the request body
///
/// # Returns
///
/// The hex encoded HMAC-SHA256 of `body`.
pub fn sign_payload(secret: &str, body: &[u8]) -> Result<String, InvalidLength> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())?;
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check a received signature against the body, as a subscriber would.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    if secret.is_empty() || signature.is_empty() {
        warn!(
            has_secret = !secret.is_empty(),
            has_signature = !signature.is_empty(),
            "webhook_signature_missing_fields"
        );
        return false;
    }

    let expected = match sign_payload(secret, body) {
        Ok(s) => s,
        Err(_) => {
            warn!("webhook_signature_invalid_key");
            return false;
        }
    };

    let valid = constant_time_compare(&expected, signature);

    if !valid {
        warn!(
            expected_length = expected.len(),
            actual_length = signature.len(),
            "webhook_signature_mismatch"
        );
    }

    valid
}

/// Constant-time string comparison to prevent timing attacks.
pub(crate) fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result = 0u8;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_payload_known_vector() {
        // RFC 4231 test case 2
        let signature = sign_payload("Jefe", b"what do ya want for nothing?").unwrap();

        assert_eq!(
            signature,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_sign_payload_depends_on_secret_and_body() {
        let body = br#"{"headers":{},"bodyURL":"https://x/db/email/1?token=t"}"#;

        let a = sign_payload("secret-a", body).unwrap();
        let b = sign_payload("secret-b", body).unwrap();
        let c = sign_payload("secret-a", b"other body").unwrap();

        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_verify_signature_valid() {
        let body = b"payload";
        let signature = sign_payload("key", body).unwrap();

        assert!(verify_signature("key", body, &signature));
    }

    #[test]
    fn test_verify_signature_tampered() {
        let signature = sign_payload("key", b"payload").unwrap();

        assert!(!verify_signature("key", b"payload!", &signature));
        assert!(!verify_signature("other", b"payload", &signature));
    }

    #[test]
    fn test_verify_signature_missing_fields() {
        assert!(!verify_signature("", b"payload", "sig"));
        assert!(!verify_signature("key", b"payload", ""));
    }

    #[test]
    fn test_constant_time_compare() {
        assert!(constant_time_compare("abc", "abc"));
        assert!(!constant_time_compare("abc", "abd"));
        assert!(!constant_time_compare("abc", "abcd"));
    }
}

//! Request body signatures
//!
//! Ingestion calls carry `X-Signature: hex(HMAC-SHA256(secret, body))`
//! computed over the exact body bytes. Verification runs on the raw bytes
//! before any JSON parsing.

use crate::auth::{constant_time_eq, SigningSecret};
use crate::{Result, TrailError};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the body signature
pub const SIGNATURE_HEADER: &str = "x-signature";

fn digest(secret: &SigningSecret, body: &[u8]) -> Vec<u8> {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC can take key of any size");
    mac.update(body);
    mac.finalize().into_bytes().to_vec()
}

/// Compute the lowercase hex signature for a body
pub fn sign_body(secret: &SigningSecret, body: &[u8]) -> String {
    hex::encode(digest(secret, body))
}

/// Check a header-supplied signature against the body.
///
/// Any difference, including an undecodable or wrong-length signature, is
/// `SignatureMismatch`.
pub fn verify_body(secret: &SigningSecret, body: &[u8], supplied: &str) -> Result<()> {
    let expected = digest(secret, body);
    let supplied = hex::decode(supplied.trim()).unwrap_or_default();

    if constant_time_eq(&expected, &supplied) {
        Ok(())
    } else {
        Err(TrailError::SignatureMismatch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_then_verify() {
        let secret = SigningSecret::generate();
        let body = br#"{"post_urn":"urn:1","action":"comment_generated","author_slug":"x"}"#;
        let sig = sign_body(&secret, body);
        assert_eq!(sig.len(), 64);
        assert!(verify_body(&secret, body, &sig).is_ok());
        assert!(verify_body(&secret, body, &sig.to_uppercase()).is_ok());
    }

    #[test]
    fn test_known_vector() {
        // RFC 4231 test case 2
        let secret = SigningSecret::from_string("Jefe");
        let sig = sign_body(&secret, b"what do ya want for nothing?");
        assert_eq!(
            sig,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_different_secret_is_mismatch() {
        let body = b"{}";
        let sig = sign_body(&SigningSecret::generate(), body);
        let err = verify_body(&SigningSecret::generate(), body, &sig).unwrap_err();
        assert!(matches!(err, TrailError::SignatureMismatch));
    }

    #[test]
    fn test_whitespace_in_body_matters() {
        let secret = SigningSecret::generate();
        let sig = sign_body(&secret, br#"{"a":1}"#);
        assert!(verify_body(&secret, br#"{"a": 1}"#, &sig).is_err());
    }

    #[test]
    fn test_malformed_signatures_are_mismatch() {
        let secret = SigningSecret::generate();
        let body = b"payload";
        let sig = sign_body(&secret, body);
        let extended = format!("{}00", sig);

        for bad in ["", "zz", &sig[..62], extended.as_str()] {
            assert!(matches!(
                verify_body(&secret, body, bad),
                Err(TrailError::SignatureMismatch)
            ));
        }
    }
}

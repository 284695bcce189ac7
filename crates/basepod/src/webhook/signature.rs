//! Webhook signatures — HMAC-SHA256 verification and secret generation.

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Verify a `X-Hub-Signature-256` header (`sha256=<hex>`) against the body.
///
/// The MAC comparison is constant-time; any malformed header rejects.
pub fn verify_signature(body: &[u8], secret: &str, header: &str) -> bool {
    let Some(hex_digest) = header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

/// Sign a body the way the forge does; used by tests and webhook setup
/// verification.
pub fn sign(body: &[u8], secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts any key length");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Fresh 32-byte hex webhook secret.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip_accepts() {
        let body = br#"{"ref":"refs/heads/main"}"#;
        let header = sign(body, "topsecret");
        assert!(verify_signature(body, "topsecret", &header));
    }

    #[test]
    fn test_known_vector() {
        // HMAC-SHA256("", "") from RFC-style test tooling
        let header = sign(b"", "");
        assert_eq!(
            header,
            "sha256=b613679a0814d9ec772f95d778c35fc5ff1697c493715653c6c712144292c5ad"
        );
        assert!(verify_signature(b"", "", &header));
    }

    #[test]
    fn test_bit_flip_rejects() {
        let body = b"payload".to_vec();
        let header = sign(&body, "s3cr3t");

        let mut flipped_body = body.clone();
        flipped_body[0] ^= 0x01;
        assert!(!verify_signature(&flipped_body, "s3cr3t", &header));

        // Flip one hex digit of the signature
        let mut chars: Vec<char> = header.chars().collect();
        let last = chars.len() - 1;
        chars[last] = if chars[last] == '0' { '1' } else { '0' };
        let flipped_header: String = chars.into_iter().collect();
        assert!(!verify_signature(&body, "s3cr3t", &flipped_header));
    }

    #[test]
    fn test_wrong_secret_rejects() {
        let body = b"payload";
        let header = sign(body, "right");
        assert!(!verify_signature(body, "wrong", &header));
    }

    #[test]
    fn test_malformed_headers_reject() {
        let body = b"payload";
        assert!(!verify_signature(body, "s", ""));
        assert!(!verify_signature(body, "s", "sha1=abcd"));
        assert!(!verify_signature(body, "s", "sha256=zz-not-hex"));
        assert!(!verify_signature(body, "s", "sha256="));
    }

    #[test]
    fn test_generated_secret_shape() {
        let a = generate_secret();
        let b = generate_secret();
        assert_eq!(a.len(), 64);
        assert_ne!(a, b);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }
}

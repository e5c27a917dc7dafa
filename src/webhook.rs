//! Inbound git event structures

use hex::decode as hex_decode;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::error;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

/// A push notification delivered by a webhook transport
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GitEventData {
    pub url: String,
    pub branch: String,
    pub sha: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub affected_files: Vec<String>,
}

/// Verify an `X-Hub-Signature-256` header against the shared secret
pub fn verify_signature(secret: &str, payload: &[u8], signature_header: &str) -> bool {
    // Expected format: "sha256=..."
    let Some(signature) = signature_header.strip_prefix("sha256=") else {
        return false;
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);

    match hex_decode(signature) {
        // verify_slice compares in constant time
        Ok(signature_bytes) => mac.verify_slice(&signature_bytes).is_ok(),
        Err(_) => {
            error!("Signature header is not valid hex");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, payload: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(payload);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn accepts_matching_signature() {
        let body = br#"{"url":"u","branch":"main","sha":"abc"}"#;
        assert!(verify_signature("topsecret", body, &sign("topsecret", body)));
    }

    #[test]
    fn rejects_wrong_secret_prefix_or_encoding() {
        let body = b"payload";
        assert!(!verify_signature("a", body, &sign("b", body)));
        assert!(!verify_signature("a", body, "sha1=deadbeef"));
        assert!(!verify_signature("a", body, "sha256=not-hex"));
    }

    #[test]
    fn event_defaults_optional_fields() {
        let event: GitEventData =
            serde_json::from_str(r#"{"url":"u","branch":"main","sha":"abc"}"#).unwrap();
        assert!(event.owner.is_empty());
        assert!(event.affected_files.is_empty());
    }
}

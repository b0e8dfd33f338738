//! Request signing and verification (§4.7): every request binds
//! `(device_id, method, url, sha256(body))` via a keyed Ed25519 signature,
//! following the teacher's `relay::auth` timestamp-freshness pattern but
//! covering the full request rather than a fixed challenge string.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::{engine::general_purpose::STANDARD, Engine};
use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::identity::DeviceIdentity;

pub const HEADER_DEVICE: &str = "X-Codemem-Device";
pub const HEADER_TIMESTAMP: &str = "X-Codemem-Timestamp";
pub const HEADER_SIGNATURE: &str = "X-Codemem-Signature";

/// Signatures older or newer than this (seconds) are rejected outright.
const TIMESTAMP_WINDOW_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct SignedHeaders {
    pub device_id: String,
    pub timestamp: u64,
    pub signature_b64: String,
}

fn body_digest_hex(body: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    hex::encode(hasher.finalize())
}

fn signing_payload(method: &str, url: &str, body_digest_hex: &str, timestamp: u64) -> String {
    format!("{method}\n{url}\n{body_digest_hex}\n{timestamp}")
}

/// Sign one outbound request, returning the three headers to attach.
pub fn sign_request(identity: &DeviceIdentity, method: &str, url: &str, body: &[u8]) -> SignedHeaders {
    let timestamp = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
    let payload = signing_payload(method, url, &body_digest_hex(body), timestamp);
    let signature = identity.sign(payload.as_bytes());
    SignedHeaders {
        device_id: identity.device_id.clone(),
        timestamp,
        signature_b64: STANDARD.encode(signature.to_bytes()),
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("timestamp outside freshness window")]
    StaleTimestamp,
    #[error("malformed signature")]
    MalformedSignature,
    #[error("signature does not verify")]
    SignatureMismatch,
}

/// Verify an inbound request against the claimed device's known public key.
/// Callers resolve `verifying_key` by looking up `headers.device_id` in the
/// peer registry before calling this (unknown device ids never reach here).
pub fn verify_request(
    headers: &SignedHeaders,
    verifying_key: &VerifyingKey,
    method: &str,
    url: &str,
    body: &[u8],
) -> Result<(), VerifyError> {
    let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs();
    if now.abs_diff(headers.timestamp) > TIMESTAMP_WINDOW_SECS {
        return Err(VerifyError::StaleTimestamp);
    }

    let signature_bytes =
        STANDARD.decode(&headers.signature_b64).map_err(|_| VerifyError::MalformedSignature)?;
    let signature =
        Signature::from_slice(&signature_bytes).map_err(|_| VerifyError::MalformedSignature)?;

    let payload = signing_payload(method, url, &body_digest_hex(body), headers.timestamp);
    verifying_key.verify(payload.as_bytes(), &signature).map_err(|_| VerifyError::SignatureMismatch)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let identity = DeviceIdentity::load_or_create(dir.path()).unwrap();
        let body = br#"{"ops":[]}"#;
        let signed = sign_request(&identity, "POST", "/v1/ops", body);
        let verifying_key = identity.verifying_key();
        assert!(verify_request(&signed, &verifying_key, "POST", "/v1/ops", body).is_ok());
    }

    #[test]
    fn rejects_tampered_body() {
        let dir = tempfile::tempdir().unwrap();
        let identity = DeviceIdentity::load_or_create(dir.path()).unwrap();
        let signed = sign_request(&identity, "POST", "/v1/ops", b"original");
        let verifying_key = identity.verifying_key();
        let result = verify_request(&signed, &verifying_key, "POST", "/v1/ops", b"tampered");
        assert_eq!(result, Err(VerifyError::SignatureMismatch));
    }

    #[test]
    fn rejects_stale_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let identity = DeviceIdentity::load_or_create(dir.path()).unwrap();
        let mut signed = sign_request(&identity, "GET", "/v1/status", b"");
        signed.timestamp -= 3600;
        let verifying_key = identity.verifying_key();
        let result = verify_request(&signed, &verifying_key, "GET", "/v1/status", b"");
        assert_eq!(result, Err(VerifyError::StaleTimestamp));
    }
}

//! Device identity (§4.7): an Ed25519 keypair generated on first use and
//! persisted under the keys directory, following the teacher's
//! `relay::auth`/`relay::pairing` key-handling idiom.

use std::path::Path;

use ed25519_dalek::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};

use crate::{SyncError, SyncResult};

const PRIVATE_KEY_FILE: &str = "device.key";
const PUBLIC_KEY_FILE: &str = "device.pub";

/// This node's signing identity, plus a stable `device_id` derived from the
/// public key's fingerprint so peers can address this node without a
/// separately-assigned name.
pub struct DeviceIdentity {
    pub device_id: String,
    signing_key: SigningKey,
}

impl DeviceIdentity {
    /// Load the identity from `keys_dir`, generating and persisting a new
    /// keypair if none exists yet.
    pub fn load_or_create(keys_dir: &Path) -> SyncResult<Self> {
        std::fs::create_dir_all(keys_dir)?;
        let key_path = keys_dir.join(PRIVATE_KEY_FILE);

        let signing_key = if key_path.exists() {
            let pem = std::fs::read_to_string(&key_path)?;
            SigningKey::from_pkcs8_pem(&pem).map_err(|e| SyncError::Identity(e.to_string()))?
        } else {
            let mut rng = rand::rngs::OsRng;
            let signing_key = SigningKey::generate(&mut rng);
            let pem = signing_key
                .to_pkcs8_pem(Default::default())
                .map_err(|e| SyncError::Identity(e.to_string()))?;
            std::fs::write(&key_path, pem.as_bytes())?;
            std::fs::write(keys_dir.join(PUBLIC_KEY_FILE), signing_key.verifying_key().to_bytes())?;
            signing_key
        };

        let device_id = fingerprint(&signing_key.verifying_key());
        Ok(Self { device_id, signing_key })
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn sign(&self, payload: &[u8]) -> Signature {
        self.signing_key.sign(payload)
    }
}

/// SHA-256 of the public key, hex-encoded — §3 Peer's `pinned_fingerprint`
/// shape, and this node's own `device_id`.
pub fn fingerprint(verifying_key: &VerifyingKey) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifying_key.to_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generates_and_reloads_the_same_identity() {
        let dir = tempfile::tempdir().unwrap();
        let first = DeviceIdentity::load_or_create(dir.path()).unwrap();
        let second = DeviceIdentity::load_or_create(dir.path()).unwrap();
        assert_eq!(first.device_id, second.device_id);
        assert_eq!(first.public_key_bytes(), second.public_key_bytes());
    }

    #[test]
    fn fingerprint_is_stable_for_the_same_key() {
        let dir = tempfile::tempdir().unwrap();
        let identity = DeviceIdentity::load_or_create(dir.path()).unwrap();
        assert_eq!(identity.device_id, fingerprint(&identity.verifying_key()));
        assert_eq!(identity.device_id.len(), 64);
    }
}

//! KMS client port (spec.md §1: "provides `Sign(keyID, bytes)` and
//! `ExportPublicKey(keyID)`"). Signing keys are referenced by key ID and
//! never leave the client — `SoftwareKms` holds them in-process for tests
//! and single-node deployments; a real deployment would point this trait at
//! an external key-management service instead.

use async_trait::async_trait;
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use orb_types::OrbError;
use rand::rngs::OsRng;
use std::collections::HashMap;
use tokio::sync::RwLock;

type Result<T> = std::result::Result<T, OrbError>;

#[async_trait]
pub trait KmsClient: Send + Sync {
    /// Sign `bytes` with the key named `key_id`, returning a multibase
    /// string suitable for embedding in a VC proof or HTTP-Signature
    /// header.
    async fn sign(&self, key_id: &str, bytes: &[u8]) -> Result<String>;

    /// The multibase-encoded public key for `key_id`, for embedding in an
    /// actor document or verifying a signature produced by this client.
    async fn export_public_key(&self, key_id: &str) -> Result<String>;

    /// Verify `signature` (as returned by `sign`) over `bytes` against the
    /// public key currently held for `key_id`.
    async fn verify(&self, key_id: &str, bytes: &[u8], signature: &str) -> Result<bool>;
}

/// An in-process software KMS backed by ed25519 keys generated on first
/// use. Good enough for a single node; never for a multi-node deployment
/// sharing a signing identity.
pub struct SoftwareKms {
    keys: RwLock<HashMap<String, SigningKey>>,
}

impl SoftwareKms {
    pub fn new() -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
        }
    }

    async fn key_for(&self, key_id: &str) -> SigningKey {
        if let Some(key) = self.keys.read().await.get(key_id) {
            return key.clone();
        }
        let mut w = self.keys.write().await;
        w.entry(key_id.to_string())
            .or_insert_with(|| SigningKey::generate(&mut OsRng))
            .clone()
    }
}

impl Default for SoftwareKms {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KmsClient for SoftwareKms {
    async fn sign(&self, key_id: &str, bytes: &[u8]) -> Result<String> {
        let key = self.key_for(key_id).await;
        let sig = key.sign(bytes);
        Ok(multibase::encode(
            multibase::Base::Base58Btc,
            sig.to_bytes(),
        ))
    }

    async fn export_public_key(&self, key_id: &str) -> Result<String> {
        let key = self.key_for(key_id).await;
        Ok(multibase::encode(
            multibase::Base::Base58Btc,
            key.verifying_key().to_bytes(),
        ))
    }

    async fn verify(&self, key_id: &str, bytes: &[u8], signature: &str) -> Result<bool> {
        let key = self.key_for(key_id).await;
        verify_with_public_key(&key.verifying_key(), bytes, signature)
    }
}

/// Verify a multibase-encoded ed25519 signature against an arbitrary
/// multibase-encoded public key, for checking a signature produced by a
/// *remote* actor whose key we only hold as cached bytes.
pub fn verify_with_public_key_multibase(
    public_key_multibase: &str,
    bytes: &[u8],
    signature: &str,
) -> Result<bool> {
    let (_, key_bytes) = multibase::decode(public_key_multibase)
        .map_err(|e| OrbError::Validation(format!("bad public key encoding: {e}")))?;
    let key_array: [u8; 32] = key_bytes
        .try_into()
        .map_err(|_| OrbError::Validation("public key is not 32 bytes".to_string()))?;
    let verifying_key = VerifyingKey::from_bytes(&key_array)
        .map_err(|e| OrbError::Validation(format!("bad public key: {e}")))?;
    verify_with_public_key(&verifying_key, bytes, signature)
}

fn verify_with_public_key(
    verifying_key: &VerifyingKey,
    bytes: &[u8],
    signature: &str,
) -> Result<bool> {
    let (_, sig_bytes) = multibase::decode(signature)
        .map_err(|e| OrbError::Validation(format!("bad signature encoding: {e}")))?;
    let sig_array: [u8; 64] = sig_bytes
        .try_into()
        .map_err(|_| OrbError::Validation("signature is not 64 bytes".to_string()))?;
    let signature = ed25519_dalek::Signature::from_bytes(&sig_array);
    Ok(verifying_key.verify_strict(bytes, &signature).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sign_and_verify_round_trips() {
        let kms = SoftwareKms::new();
        let sig = kms.sign("service-key", b"hello").await.unwrap();
        assert!(kms.verify("service-key", b"hello", &sig).await.unwrap());
        assert!(!kms.verify("service-key", b"tampered", &sig).await.unwrap());
    }

    #[tokio::test]
    async fn export_then_verify_with_exported_key() {
        let kms = SoftwareKms::new();
        let public = kms.export_public_key("service-key").await.unwrap();
        let sig = kms.sign("service-key", b"payload").await.unwrap();
        assert!(verify_with_public_key_multibase(&public, b"payload", &sig).unwrap());
    }
}

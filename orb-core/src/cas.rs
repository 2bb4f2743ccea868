//! Content-addressable store port (spec.md §1: "`Put(bytes)→CID`,
//! `Get(CID)→bytes`"). Writes are idempotent — the CID is a hash of the
//! content, so writing the same bytes twice is a no-op past the first.
//!
//! `CAS_TYPE` selects the backend at startup (`config::CasType`); the
//! `ipfs` variant is a thin proxy noted in spec.md's external-interfaces
//! section but not itself part of the core, so only the `local` backend is
//! implemented in-process here.

use async_trait::async_trait;
use orb_types::{Cid, OrbError};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use tokio::sync::RwLock;

type Result<T> = std::result::Result<T, OrbError>;

#[async_trait]
pub trait ContentAddressableStore: Send + Sync {
    async fn put(&self, bytes: Vec<u8>) -> Result<Cid>;
    async fn get(&self, cid: &Cid) -> Result<Vec<u8>>;
    /// True without fetching the bytes — used by the observer's
    /// multi-transport fetch to skip transports that don't have it.
    async fn has(&self, cid: &Cid) -> bool;
}

fn content_cid(bytes: &[u8]) -> Cid {
    let digest = Sha256::digest(bytes);
    Cid::new(multibase::encode(multibase::Base::Base32Lower, digest))
}

/// An in-memory CAS backend, the `local` variant of `CAS_TYPE`. Durable
/// across the process lifetime only — no disk persistence, matching the
/// teacher's in-memory store philosophy for the non-Postgres path.
pub struct LocalCas {
    objects: RwLock<HashMap<Cid, Vec<u8>>>,
}

impl LocalCas {
    pub fn new() -> Self {
        Self {
            objects: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for LocalCas {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentAddressableStore for LocalCas {
    async fn put(&self, bytes: Vec<u8>) -> Result<Cid> {
        let cid = content_cid(&bytes);
        self.objects.write().await.insert(cid.clone(), bytes);
        Ok(cid)
    }

    async fn get(&self, cid: &Cid) -> Result<Vec<u8>> {
        self.objects
            .read()
            .await
            .get(cid)
            .cloned()
            .ok_or_else(|| OrbError::NotFound(format!("cas object {cid} not found")))
    }

    async fn has(&self, cid: &Cid) -> bool {
        self.objects.read().await.contains_key(cid)
    }
}

/// Serialize `value` to canonical JSON bytes and write it to `cas`,
/// returning its CID. Every CAS write in this crate (chunk/index files,
/// linksets) goes through this helper so the hash always covers the same
/// encoding the reader will deserialize from.
pub async fn put_json<T: serde::Serialize + Sync>(
    cas: &dyn ContentAddressableStore,
    value: &T,
) -> Result<Cid> {
    let bytes = serde_json::to_vec(value).map_err(|e| OrbError::Fatal(e.to_string()))?;
    cas.put(bytes).await
}

/// Fetch and deserialize a JSON object previously written with
/// [`put_json`].
pub async fn get_json<T: serde::de::DeserializeOwned>(
    cas: &dyn ContentAddressableStore,
    cid: &Cid,
) -> Result<T> {
    let bytes = cas.get(cid).await?;
    serde_json::from_slice(&bytes).map_err(|e| OrbError::Validation(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_is_idempotent_and_content_addressed() {
        let cas = LocalCas::new();
        let a = cas.put(b"hello".to_vec()).await.unwrap();
        let b = cas.put(b"hello".to_vec()).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(cas.get(&a).await.unwrap(), b"hello".to_vec());
    }

    #[tokio::test]
    async fn get_missing_is_not_found() {
        let cas = LocalCas::new();
        let err = cas.get(&Cid::new("bafymissing")).await.unwrap_err();
        assert!(matches!(err, OrbError::NotFound(_)));
    }

    #[tokio::test]
    async fn put_json_round_trips() {
        let cas = LocalCas::new();
        let cid = put_json(&cas, &vec![1, 2, 3]).await.unwrap();
        let back: Vec<i32> = get_json(&cas, &cid).await.unwrap();
        assert_eq!(back, vec![1, 2, 3]);
    }
}

//! Anchor Builder (C3): turns a cut batch into an anchor linkset, wraps it
//! in a Verifiable Credential signed by the local service, and persists
//! the result before handing it to C4 (spec.md §4.3).
//!
//! Invariant carried from spec.md §3: a VC is never released to witnesses
//! until it is well-formed and locally stored — `build` always calls
//! `store.save_anchor` before returning.

use crate::cas::{put_json, ContentAddressableStore};
use crate::kms::KmsClient;
use crate::store::OrbStore;
use chrono::Utc;
use orb_types::{
    AnchorCredential, AnchorLinkset, AnchorRecord, AnchorState, Batch, DidSuffix, Iri, OrbError,
};
use std::collections::BTreeMap;
use std::sync::Arc;

type Result<T> = std::result::Result<T, OrbError>;

pub struct AnchorBuilder {
    cas: Arc<dyn ContentAddressableStore>,
    kms: Arc<dyn KmsClient>,
    store: Arc<dyn OrbStore>,
    local_actor_iri: Iri,
    signing_key_id: String,
    anchor_profile: String,
}

impl AnchorBuilder {
    pub fn new(
        cas: Arc<dyn ContentAddressableStore>,
        kms: Arc<dyn KmsClient>,
        store: Arc<dyn OrbStore>,
        local_actor_iri: Iri,
        signing_key_id: String,
    ) -> Self {
        Self {
            cas,
            kms,
            store,
            local_actor_iri,
            signing_key_id,
            anchor_profile: "https://w3id.org/orb#v0".to_string(),
        }
    }

    /// Build, sign, and persist an anchor for `batch`, returning the
    /// resulting record. `anchor_origin` is the origin hint supplied by
    /// the batch's operations (already checked against `ALLOWED_ORIGINS`
    /// by the REST layer before admission).
    pub async fn build(&self, batch: Batch, anchor_origin: String) -> Result<AnchorRecord> {
        let mut parents: BTreeMap<DidSuffix, Option<orb_types::Cid>> = BTreeMap::new();
        for op in &batch.operations {
            if parents.contains_key(&op.did_suffix) {
                continue;
            }
            let previous = self.store.previous_anchor_for_suffix(&op.did_suffix).await?;
            parents.insert(op.did_suffix.clone(), previous);
        }

        let linkset = AnchorLinkset {
            anchor: batch.core_index_cid.clone(),
            parents,
            profile: self.anchor_profile.clone(),
            anchor_origin,
            timestamp: Utc::now(),
        };
        let anchor_cid = put_json(self.cas.as_ref(), &linkset).await?;

        let unsigned = AnchorCredential {
            credential_subject: anchor_cid.clone(),
            issuer: self.local_actor_iri.clone(),
            issuance_date: Utc::now(),
            proof: String::new(),
        };
        let signing_bytes = serde_json::to_vec(&unsigned).map_err(|e| OrbError::Fatal(e.to_string()))?;
        let proof = self.kms.sign(&self.signing_key_id, &signing_bytes).await?;
        let vc = AnchorCredential { proof, ..unsigned };
        let vc_cid = put_json(self.cas.as_ref(), &vc).await?;

        let record = AnchorRecord {
            vc_cid,
            anchor_cid,
            batch_cid: batch.core_index_cid.clone(),
            vc,
            state: AnchorState::Pending,
            proofs: Vec::new(),
            created_at: Utc::now(),
            published: false,
        };

        self.store.save_batch(&batch).await?;
        self.store.save_anchor(&record).await?;
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cas::LocalCas;
    use crate::kms::SoftwareKms;
    use crate::store_memory::MemoryStore;
    use orb_types::{Cid, DidSuffix, Operation, OperationType};

    fn sample_batch() -> Batch {
        Batch {
            chunk_file_cid: Cid::new("bafychunk"),
            provisional_index_cid: None,
            core_index_cid: Cid::new("bafycore"),
            operations: vec![Operation {
                op_type: OperationType::Create,
                did_suffix: DidSuffix::new("s1"),
                delta_commitment: "commit".to_string(),
                reveal_value: "reveal".to_string(),
                signed_data: "signed".to_string(),
                anchor_origin: "https://node.test".to_string(),
            }],
        }
    }

    #[tokio::test]
    async fn build_persists_pending_anchor_with_signed_vc() {
        let cas: Arc<dyn ContentAddressableStore> = Arc::new(LocalCas::new());
        let kms: Arc<dyn KmsClient> = Arc::new(SoftwareKms::new());
        let store: Arc<dyn OrbStore> = Arc::new(MemoryStore::new());
        let builder = AnchorBuilder::new(
            cas,
            kms.clone(),
            store.clone(),
            "https://node.test/services/orb".to_string(),
            "service-key".to_string(),
        );
        let record = builder
            .build(sample_batch(), "https://node.test".to_string())
            .await
            .unwrap();
        assert_eq!(record.state, AnchorState::Pending);
        assert!(!record.vc.proof.is_empty());
        let loaded = store.load_anchor(&record.vc_cid).await.unwrap();
        assert!(loaded.is_some());

        let verified = kms
            .verify(
                "service-key",
                &serde_json::to_vec(&AnchorCredential {
                    proof: String::new(),
                    ..record.vc.clone()
                })
                .unwrap(),
                &record.vc.proof,
            )
            .await
            .unwrap();
        assert!(verified);
    }

    #[tokio::test]
    async fn first_create_has_no_previous_anchor() {
        let cas: Arc<dyn ContentAddressableStore> = Arc::new(LocalCas::new());
        let kms: Arc<dyn KmsClient> = Arc::new(SoftwareKms::new());
        let store: Arc<dyn OrbStore> = Arc::new(MemoryStore::new());
        let builder = AnchorBuilder::new(
            cas.clone(),
            kms,
            store,
            "https://node.test/services/orb".to_string(),
            "service-key".to_string(),
        );
        let record = builder
            .build(sample_batch(), "https://node.test".to_string())
            .await
            .unwrap();
        let linkset: AnchorLinkset = crate::cas::get_json(cas.as_ref(), &record.anchor_cid)
            .await
            .unwrap();
        assert_eq!(linkset.parents.get(&DidSuffix::new("s1")), Some(&None));
    }
}

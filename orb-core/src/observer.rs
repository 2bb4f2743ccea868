//! Observer (C6): ingests `Create`/`Announce` anchor activities from the
//! inbox, fetches the referenced anchor from CAS, verifies it, and threads
//! its operations into the local per-suffix operation log (spec.md §4.6).
//! Per-suffix updates are serialised through a keyed mutex, not a spawned
//! actor — the same per-key-mutex shape spec.md §5 specifies for C6,
//! distinct from C4's per-event mailbox actor.

use crate::activitypub::actor::ActorResolver;
use crate::activitypub::inbox::AnchorIngest;
use crate::cas::ContentAddressableStore;
use crate::kms::verify_with_public_key_multibase;
use crate::model::LogEntry;
use crate::store::OrbStore;
use async_trait::async_trait;
use orb_types::batch::{ChunkFile, CoreIndexFile, ProvisionalIndexFile};
use orb_types::{
    Activity, ActivityKind, AnchorCredential, AnchorLinkset, AnchorRecord, AnchorState, Cid,
    DidSuffix, Operation, OperationType, OrbError,
};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

type Result<T> = std::result::Result<T, OrbError>;

pub struct Observer {
    cas: Arc<dyn ContentAddressableStore>,
    store: Arc<dyn OrbStore>,
    actors: Arc<ActorResolver>,
    http: reqwest::Client,
    /// One mutex per DID suffix currently being updated, created lazily.
    suffix_locks: Mutex<HashMap<DidSuffix, Arc<Mutex<()>>>>,
}

impl Observer {
    pub fn new(
        cas: Arc<dyn ContentAddressableStore>,
        store: Arc<dyn OrbStore>,
        actors: Arc<ActorResolver>,
        http: reqwest::Client,
    ) -> Self {
        Self {
            cas,
            store,
            actors,
            http,
            suffix_locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, suffix: &DidSuffix) -> Arc<Mutex<()>> {
        let mut locks = self.suffix_locks.lock().await;
        locks
            .entry(suffix.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    async fn fetch_remote_create(&self, activity_iri: &str) -> Result<(Cid, AnchorCredential)> {
        let activity: Activity = self
            .http
            .get(activity_iri)
            .send()
            .await
            .map_err(|e| OrbError::TransientTransport(e.to_string()))?
            .json()
            .await
            .map_err(|e| OrbError::Validation(format!("malformed remote activity: {e}")))?;
        match activity.kind {
            ActivityKind::Create { vc_cid, vc } => Ok((vc_cid, vc)),
            _ => Err(OrbError::Validation(format!(
                "{activity_iri} did not resolve to a Create activity"
            ))),
        }
    }

    /// Step 1: fetch `cid`'s bytes, trying the local CAS first, falling
    /// back to the content's own issuer peer over HTTP. IPFS is a further
    /// fallback left for a real deployment's IPFS-proxying CAS backend.
    async fn fetch_object(&self, cid: &Cid, origin_hint: Option<&str>) -> Result<Vec<u8>> {
        if let Ok(bytes) = self.cas.get(cid).await {
            return Ok(bytes);
        }
        if let Some(origin) = origin_hint {
            let url = format!("{}/cas/{}", origin.trim_end_matches('/'), cid);
            if let Ok(response) = self.http.get(&url).send().await {
                if let Ok(bytes) = response.bytes().await {
                    return Ok(bytes.to_vec());
                }
            }
        }
        Err(OrbError::NotFound(format!("cas object {cid} unavailable on any transport")))
    }

    async fn reconstruct_operations(
        &self,
        linkset: &AnchorLinkset,
    ) -> Result<HashMap<DidSuffix, Vec<Operation>>> {
        let core_bytes = self
            .fetch_object(&linkset.anchor, Some(linkset.anchor_origin.as_str()))
            .await?;
        let core_index: CoreIndexFile =
            serde_json::from_slice(&core_bytes).map_err(|e| OrbError::Validation(e.to_string()))?;

        let mut by_suffix: HashMap<DidSuffix, Vec<Operation>> = HashMap::new();
        for op_ref in &core_index.core_operations {
            by_suffix.entry(op_ref.did_suffix.clone()).or_default().push(Operation {
                op_type: op_ref.op_type,
                did_suffix: op_ref.did_suffix.clone(),
                delta_commitment: String::new(),
                reveal_value: op_ref.reveal_value.clone(),
                signed_data: op_ref.signed_data.clone(),
                anchor_origin: linkset.anchor_origin.clone(),
            });
        }

        if let Some(provisional_cid) = &core_index.provisional_index_file_cid {
            let provisional_bytes = self
                .fetch_object(provisional_cid, Some(linkset.anchor_origin.as_str()))
                .await?;
            let provisional: ProvisionalIndexFile =
                serde_json::from_slice(&provisional_bytes).map_err(|e| OrbError::Validation(e.to_string()))?;
            let chunk_bytes = self
                .fetch_object(&provisional.chunk_file_cid, Some(linkset.anchor_origin.as_str()))
                .await?;
            let chunk: ChunkFile =
                serde_json::from_slice(&chunk_bytes).map_err(|e| OrbError::Validation(e.to_string()))?;
            for (op_ref, delta) in provisional.provisional_operations.iter().zip(chunk.deltas.iter()) {
                by_suffix.entry(op_ref.did_suffix.clone()).or_default().push(Operation {
                    op_type: OperationType::Update,
                    did_suffix: op_ref.did_suffix.clone(),
                    delta_commitment: String::new(),
                    reveal_value: op_ref.reveal_value.clone(),
                    signed_data: delta.clone(),
                    anchor_origin: linkset.anchor_origin.clone(),
                });
            }
        }
        Ok(by_suffix)
    }

    async fn ingest_anchor(&self, vc_cid: Cid, vc: AnchorCredential) -> Result<()> {
        if let Some(existing) = self.store.load_anchor(&vc_cid).await? {
            if existing.published {
                return Ok(());
            }
        }

        let issuer = self.actors.resolve(&vc.issuer).await?;
        let unsigned = AnchorCredential {
            proof: String::new(),
            ..vc.clone()
        };
        let signing_bytes = serde_json::to_vec(&unsigned).map_err(|e| OrbError::Fatal(e.to_string()))?;
        let verified = verify_with_public_key_multibase(
            &issuer.public_key.public_key_multibase,
            &signing_bytes,
            &vc.proof,
        )?;
        if !verified {
            return Err(OrbError::Auth(format!("anchor VC {vc_cid} has an invalid issuer signature")));
        }

        let anchor_cid = vc.credential_subject.clone();
        let linkset_bytes = self.fetch_object(&anchor_cid, Some(vc.issuer.as_str())).await?;
        let linkset: AnchorLinkset =
            serde_json::from_slice(&linkset_bytes).map_err(|e| OrbError::Validation(e.to_string()))?;

        let operations_by_suffix = self.reconstruct_operations(&linkset).await?;

        for (suffix, parent) in &linkset.parents {
            let lock = self.lock_for(suffix).await;
            let _guard = lock.lock().await;

            let known_tip = self.store.previous_anchor_for_suffix(suffix).await?;
            if *parent != known_tip {
                warn!(%suffix, ?parent, ?known_tip, "fork detected, deferring to canonical-history rule at resolve time");
                if let Some(ops) = operations_by_suffix.get(suffix) {
                    for operation in ops {
                        self.store
                            .append_audit_entry(
                                suffix,
                                LogEntry {
                                    operation: operation.clone(),
                                    anchor_cid: anchor_cid.clone(),
                                    anchor_time: linkset.timestamp,
                                },
                            )
                            .await?;
                    }
                }
            }

            if let Some(ops) = operations_by_suffix.get(suffix) {
                for operation in ops {
                    self.store
                        .append_log_entry(
                            suffix,
                            LogEntry {
                                operation: operation.clone(),
                                anchor_cid: anchor_cid.clone(),
                                anchor_time: linkset.timestamp,
                            },
                        )
                        .await?;
                }
            }
            self.store.set_tip_for_suffix(suffix, anchor_cid.clone()).await?;
        }

        let record = AnchorRecord {
            vc_cid: vc_cid.clone(),
            anchor_cid,
            batch_cid: linkset.anchor.clone(),
            vc,
            state: AnchorState::Completed,
            proofs: Vec::new(),
            created_at: linkset.timestamp,
            published: true,
        };
        self.store.save_anchor(&record).await?;
        info!(%vc_cid, suffixes = linkset.parents.len(), "anchor event published locally");
        Ok(())
    }
}

#[async_trait]
impl AnchorIngest for Observer {
    async fn ingest(&self, activity: Activity) -> Result<()> {
        let (vc_cid, vc) = match activity.kind {
            ActivityKind::Create { vc_cid, vc } => (vc_cid, vc),
            ActivityKind::Announce { object } => self.fetch_remote_create(&object).await?,
            _ => {
                return Err(OrbError::Validation(
                    "observer received an activity that is neither Create nor Announce".to_string(),
                ))
            }
        };
        self.ingest_anchor(vc_cid, vc).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cas::{put_json, LocalCas};
    use crate::kms::{KmsClient, SoftwareKms};
    use crate::store_memory::MemoryStore;
    use chrono::Utc;
    use orb_types::batch::{CoreIndexFile, CoreOperationRef};
    use orb_types::{ActorCacheEntry, ActorDocument, PublicKeyDoc};
    use std::collections::BTreeMap;

    async fn seed_issuer_actor(store: &Arc<dyn OrbStore>, iri: &str, public_key: String) {
        store
            .cache_actor(ActorCacheEntry {
                document: ActorDocument {
                    iri: iri.to_string(),
                    public_key: PublicKeyDoc {
                        id: format!("{iri}#main-key"),
                        owner: iri.to_string(),
                        public_key_multibase: public_key,
                    },
                    inbox: format!("{iri}/inbox"),
                    outbox: format!("{iri}/outbox"),
                    followers: format!("{iri}/followers"),
                    following: format!("{iri}/following"),
                    witnesses: format!("{iri}/witnesses"),
                    witnessing: format!("{iri}/witnessing"),
                    liked: format!("{iri}/liked"),
                    likes: format!("{iri}/likes"),
                    shares: format!("{iri}/shares"),
                },
                cached_at: Utc::now(),
                ttl_seconds: 3600,
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn ingest_create_appends_operations_and_publishes() {
        let cas: Arc<dyn ContentAddressableStore> = Arc::new(LocalCas::new());
        let store: Arc<dyn OrbStore> = Arc::new(MemoryStore::new());
        let kms = SoftwareKms::new();
        let issuer_iri = "https://issuer.test/services/orb".to_string();
        let public_key = kms.export_public_key("issuer-key").await.unwrap();
        seed_issuer_actor(&store, &issuer_iri, public_key).await;

        let core_index = CoreIndexFile {
            provisional_index_file_cid: None,
            core_operations: vec![CoreOperationRef {
                did_suffix: DidSuffix::new("s1"),
                op_type: OperationType::Create,
                reveal_value: "reveal".to_string(),
                signed_data: "signed".to_string(),
            }],
        };
        let core_index_cid = put_json(cas.as_ref(), &core_index).await.unwrap();

        let mut parents = BTreeMap::new();
        parents.insert(DidSuffix::new("s1"), None);
        let linkset = AnchorLinkset {
            anchor: core_index_cid,
            parents,
            profile: "https://w3id.org/orb#v0".to_string(),
            anchor_origin: issuer_iri.clone(),
            timestamp: Utc::now(),
        };
        let anchor_cid = put_json(cas.as_ref(), &linkset).await.unwrap();

        let unsigned = AnchorCredential {
            credential_subject: anchor_cid.clone(),
            issuer: issuer_iri.clone(),
            issuance_date: Utc::now(),
            proof: String::new(),
        };
        let signing_bytes = serde_json::to_vec(&unsigned).unwrap();
        let proof = kms.sign("issuer-key", &signing_bytes).await.unwrap();
        let vc = AnchorCredential { proof, ..unsigned };
        let vc_cid = put_json(cas.as_ref(), &vc).await.unwrap();

        let actors = Arc::new(ActorResolver::new(store.clone(), reqwest::Client::new(), std::time::Duration::from_secs(60)));
        let observer = Observer::new(cas, store.clone(), actors, reqwest::Client::new());

        let activity = Activity::new(
            format!("{issuer_iri}/activities/1"),
            issuer_iri.clone(),
            vec![],
            ActivityKind::Create { vc_cid: vc_cid.clone(), vc },
        );
        observer.ingest(activity).await.unwrap();

        let log = store.read_log(&DidSuffix::new("s1")).await.unwrap();
        assert_eq!(log.len(), 1);
        let record = store.load_anchor(&vc_cid).await.unwrap().unwrap();
        assert!(record.published);
    }

    async fn anchor_create(
        cas: &Arc<dyn ContentAddressableStore>,
        kms: &SoftwareKms,
        issuer_iri: &str,
        suffix: &DidSuffix,
        parent: Option<Cid>,
        signed_data: &str,
    ) -> (Cid, AnchorCredential) {
        let core_index = CoreIndexFile {
            provisional_index_file_cid: None,
            core_operations: vec![CoreOperationRef {
                did_suffix: suffix.clone(),
                op_type: OperationType::Create,
                reveal_value: "reveal".to_string(),
                signed_data: signed_data.to_string(),
            }],
        };
        let core_index_cid = put_json(cas.as_ref(), &core_index).await.unwrap();

        let mut parents = BTreeMap::new();
        parents.insert(suffix.clone(), parent);
        let linkset = AnchorLinkset {
            anchor: core_index_cid,
            parents,
            profile: "https://w3id.org/orb#v0".to_string(),
            anchor_origin: issuer_iri.to_string(),
            timestamp: Utc::now(),
        };
        let anchor_cid = put_json(cas.as_ref(), &linkset).await.unwrap();

        let unsigned = AnchorCredential {
            credential_subject: anchor_cid,
            issuer: issuer_iri.to_string(),
            issuance_date: Utc::now(),
            proof: String::new(),
        };
        let signing_bytes = serde_json::to_vec(&unsigned).unwrap();
        let proof = kms.sign("issuer-key", &signing_bytes).await.unwrap();
        let vc = AnchorCredential { proof, ..unsigned };
        let vc_cid = put_json(cas.as_ref(), &vc).await.unwrap();
        (vc_cid, vc)
    }

    #[tokio::test]
    async fn a_fork_is_appended_to_the_log_and_the_audit_trail() {
        let cas: Arc<dyn ContentAddressableStore> = Arc::new(LocalCas::new());
        let store: Arc<dyn OrbStore> = Arc::new(MemoryStore::new());
        let kms = SoftwareKms::new();
        let issuer_iri = "https://issuer.test/services/orb".to_string();
        let public_key = kms.export_public_key("issuer-key").await.unwrap();
        seed_issuer_actor(&store, &issuer_iri, public_key).await;

        let actors = Arc::new(ActorResolver::new(store.clone(), reqwest::Client::new(), std::time::Duration::from_secs(60)));
        let observer = Observer::new(cas.clone(), store.clone(), actors, reqwest::Client::new());
        let suffix = DidSuffix::new("s1");

        let (vc_cid_a, vc_a) =
            anchor_create(&cas, &kms, &issuer_iri, &suffix, None, "signed-a").await;
        observer
            .ingest(Activity::new(
                format!("{issuer_iri}/activities/1"),
                issuer_iri.clone(),
                vec![],
                ActivityKind::Create { vc_cid: vc_cid_a, vc: vc_a },
            ))
            .await
            .unwrap();

        // Same parent (None) as the first anchor — this does not extend the
        // tip the first anchor just set, so it is a fork.
        let (vc_cid_b, vc_b) =
            anchor_create(&cas, &kms, &issuer_iri, &suffix, None, "signed-b").await;
        observer
            .ingest(Activity::new(
                format!("{issuer_iri}/activities/2"),
                issuer_iri.clone(),
                vec![],
                ActivityKind::Create { vc_cid: vc_cid_b, vc: vc_b },
            ))
            .await
            .unwrap();

        let log = store.read_log(&suffix).await.unwrap();
        assert_eq!(log.len(), 2, "both branches stay in the canonical log for replay to arbitrate");
        let audit = store.read_audit_log(&suffix).await.unwrap();
        assert_eq!(audit.len(), 1, "only the forking anchor's operations are preserved for audit");
        assert_eq!(audit[0].operation.signed_data, "signed-b");
    }
}

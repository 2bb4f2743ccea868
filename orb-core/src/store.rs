//! Persistence port for every durable record the anchor pipeline and
//! federation fabric touch: `operations`, `batches`, `anchors`, `didstate`,
//! `activities`, `collections`, `actors-cache` (spec.md §6's "Persisted
//! layout"), plus the accept lists and parked-delivery store this
//! expansion adds.
//!
//! Every component depends only on this trait, never on a concrete
//! backend — `MemoryStore` backs tests and single-process demos,
//! `PostgresStore` (feature `postgres`) backs real deployments.

use crate::model::{AcceptListName, LogEntry, OutboxDelivery};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orb_types::{
    ActorCacheEntry, Activity, AnchorRecord, AnchorState, Batch, Cid, CollectionKind,
    CollectionPage, CollectionSummary, DidSuffix, Iri, OrbError, WitnessProof,
};
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, OrbError>;

#[async_trait]
pub trait OrbStore: Send + Sync {
    // ── Operations (admission dedup) ──

    /// True if `(didSuffix, deltaCommitment, revealValue)` was already
    /// admitted within the pending window.
    async fn operation_seen(&self, suffix: &DidSuffix, commitment: &str, reveal: &str)
        -> Result<bool>;
    async fn mark_operation_seen(
        &self,
        suffix: &DidSuffix,
        commitment: &str,
        reveal: &str,
    ) -> Result<()>;

    // ── Batches ──

    async fn save_batch(&self, batch: &Batch) -> Result<()>;
    async fn load_batch(&self, core_index_cid: &Cid) -> Result<Option<Batch>>;

    // ── Anchors ──

    async fn save_anchor(&self, record: &AnchorRecord) -> Result<()>;
    async fn load_anchor(&self, vc_cid: &Cid) -> Result<Option<AnchorRecord>>;
    async fn update_anchor_state(&self, vc_cid: &Cid, state: AnchorState) -> Result<()>;
    async fn append_witness_proof(&self, vc_cid: &Cid, proof: WitnessProof) -> Result<()>;
    async fn mark_anchor_published(&self, vc_cid: &Cid) -> Result<()>;
    /// Anchors still `AwaitingProofs` whose record predates `cutoff` —
    /// scanned by C8's witness-expiry task.
    async fn anchors_awaiting_proofs_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<AnchorRecord>>;
    /// Anchors currently in `state` — used by C8's GC task to find
    /// `Expired` anchors whose operations need explicit re-queuing.
    async fn list_anchors_by_state(&self, state: AnchorState) -> Result<Vec<AnchorRecord>>;

    // ── Per-suffix tip + canonical operation log (didstate) ──

    async fn previous_anchor_for_suffix(&self, suffix: &DidSuffix) -> Result<Option<Cid>>;
    async fn set_tip_for_suffix(&self, suffix: &DidSuffix, anchor_cid: Cid) -> Result<()>;
    async fn append_log_entry(&self, suffix: &DidSuffix, entry: LogEntry) -> Result<()>;
    async fn read_log(&self, suffix: &DidSuffix) -> Result<Vec<LogEntry>>;
    /// Fork losers: preserved for audit, dropped from the canonical log.
    async fn append_audit_entry(&self, suffix: &DidSuffix, entry: LogEntry) -> Result<()>;
    async fn read_audit_log(&self, suffix: &DidSuffix) -> Result<Vec<LogEntry>>;
    async fn known_suffixes(&self) -> Result<Vec<DidSuffix>>;

    // ── Activities (inbox/outbox persistence) ──

    async fn inbox_seen(&self, activity_id: &str) -> Result<bool>;
    async fn mark_inbox_seen(&self, activity_id: &str) -> Result<()>;
    /// Persist a locally-originated activity by id, both for idempotency
    /// and so `GET /services/{name}/activities/{id}` can serve it back to a
    /// peer backfilling from this node's outbox.
    async fn save_outbox_activity(&self, activity: &Activity) -> Result<()>;
    async fn load_outbox_activity(&self, activity_id: &str) -> Result<Option<Activity>>;

    // ── Outbound deliveries (C5 outbox dispatcher queue) ──

    async fn enqueue_delivery(&self, delivery: OutboxDelivery) -> Result<()>;
    async fn claim_next_delivery(&self, claimer: &str) -> Result<Option<OutboxDelivery>>;
    async fn mark_delivery_processed(&self, delivery_id: Uuid) -> Result<()>;
    async fn record_delivery_failure(&self, delivery_id: Uuid, attempt_count: u32) -> Result<()>;
    async fn park_delivery(&self, delivery_id: Uuid, error: &str) -> Result<()>;
    async fn list_parked_deliveries(&self) -> Result<Vec<OutboxDelivery>>;

    // ── Collections ──

    async fn append_collection_item(
        &self,
        owner: &str,
        kind: CollectionKind,
        iri: Iri,
    ) -> Result<()>;
    async fn collection_page(
        &self,
        owner: &str,
        kind: CollectionKind,
        page_num: usize,
        page_size: usize,
    ) -> Result<CollectionPage>;
    async fn collection_summary(&self, owner: &str, kind: CollectionKind)
        -> Result<CollectionSummary>;
    async fn collection_contains(&self, owner: &str, kind: CollectionKind, iri: &str)
        -> Result<bool>;
    async fn collection_remove(&self, owner: &str, kind: CollectionKind, iri: &str) -> Result<()>;

    // ── Remote-actor cache ──

    async fn cache_actor(&self, entry: ActorCacheEntry) -> Result<()>;
    async fn get_cached_actor(&self, iri: &str) -> Result<Option<ActorCacheEntry>>;
    async fn evict_expired_actors(&self, now: DateTime<Utc>) -> Result<usize>;

    // ── Accept lists ──

    async fn accept_list_add(&self, list: AcceptListName, iri: Iri) -> Result<()>;
    async fn accept_list_remove(&self, list: AcceptListName, iri: &str) -> Result<()>;
    async fn accept_list_contains(&self, list: AcceptListName, iri: &str) -> Result<bool>;
}

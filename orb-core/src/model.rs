//! Internal operational types: storage-layer records that never cross the
//! wire to a client and so don't belong in `orb-types`, but are shared
//! across more than one component in this crate (queue deliveries, the
//! per-suffix operation log, outbox delivery jobs, accept lists).

use orb_types::{Activity, Cid, DidSuffix, Iri, Operation};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The idempotency key C2 dedupes admission on: `(didSuffix,
/// deltaCommitment, revealValue)`.
pub type OperationDedupKey = (DidSuffix, String, String);

/// A single entry in a DID suffix's canonical operation log, as replayed
/// by C7. Ordered by `(anchor_time, anchor_cid)` per spec.md §4.7.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogEntry {
    pub operation: Operation,
    pub anchor_cid: Cid,
    pub anchor_time: chrono::DateTime<chrono::Utc>,
}

/// A message delivered from the `OperationBus` to a C1 subscriber, carrying
/// enough to ack/nack it.
#[derive(Clone, Debug)]
pub struct Delivery {
    pub delivery_id: Uuid,
    pub operation: Operation,
}

/// A queued outbound delivery: one activity to one destination inbox.
/// C5's outbox dispatcher claims these the way the teacher's
/// `OutboxDispatcher` claims `OutboxEvent`s.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OutboxDelivery {
    pub delivery_id: Uuid,
    pub activity: Activity,
    pub target_inbox: Iri,
    pub attempt_count: u32,
}

/// Which accept-list an administrative mutation or lookup targets.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum AcceptListName {
    Follow,
    Witness,
}

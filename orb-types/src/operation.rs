//! DID operations: the records clients submit and that flow through the
//! queue, batch, and anchor pipeline. See spec.md §3 "Operation".

use crate::ids::DidSuffix;
use serde::{Deserialize, Serialize};

/// The four Sidetree operation kinds a client may submit for a DID.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Create,
    Update,
    Recover,
    Deactivate,
}

/// A single DID operation as admitted from a client. Signed by whichever
/// key is appropriate to its type (the recovery key for `recover`, the
/// update key for `update`/`deactivate`, none yet for `create`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "type")]
    pub op_type: OperationType,
    pub did_suffix: DidSuffix,
    /// Commitment to the next update/recovery key, revealed by a later op.
    pub delta_commitment: String,
    /// The value revealed to satisfy the *current* commitment on this DID.
    pub reveal_value: String,
    /// Opaque signed operation payload (patch data, recovery data, ...).
    pub signed_data: String,
    /// Anchor origin hint the client asked to be anchored against, checked
    /// against `ALLOWED_ORIGINS`.
    pub anchor_origin: String,
}

impl Operation {
    /// The idempotency key C2 dedupes admission on within the pending
    /// window: `(didSuffix, deltaCommitment, revealValue)`.
    pub fn dedup_key(&self) -> (DidSuffix, String, String) {
        (
            self.did_suffix.clone(),
            self.delta_commitment.clone(),
            self.reveal_value.clone(),
        )
    }
}

//! Anchor linksets, the Verifiable Credential issued over them, witness
//! proofs, and the announced anchor event. See spec.md §3 "Anchor Linkset",
//! "Anchor Credential (VC)", "Anchor Event", "Witness Proof".

use crate::ids::{Cid, DidSuffix, Iri};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A content-addressed document referencing the core-index CID, the
/// previous anchor per touched DID suffix, and anchoring metadata.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnchorLinkset {
    pub anchor: Cid,
    pub parents: BTreeMap<DidSuffix, Option<Cid>>,
    pub profile: String,
    pub anchor_origin: String,
    pub timestamp: DateTime<Utc>,
}

/// A JSON-LD Verifiable Credential whose `credentialSubject` is an anchor
/// linkset CID, issued by the local service's signing key.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnchorCredential {
    pub credential_subject: Cid,
    pub issuer: Iri,
    pub issuance_date: DateTime<Utc>,
    /// Opaque signed proof bytes (base64/multibase-encoded by the signer).
    pub proof: String,
}

/// A single witness's countersignature over an anchor VC. A witness may
/// emit at most one of these per VC — enforced by C4's `(witnessIri,
/// vcCid)` dedup on arrival.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WitnessProof {
    pub witness_iri: Iri,
    pub signed_proof_doc: String,
    pub timestamp: DateTime<Utc>,
}

/// The unit announced on federation: a VC plus whatever witness proofs
/// satisfied the policy that completed it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnchorEvent {
    pub vc_cid: Cid,
    pub witness_proofs: Vec<WitnessProof>,
}

/// C4's witness-collection state machine states, persisted alongside each
/// anchor record so a crash can resume collection where it left off.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum AnchorState {
    Pending,
    AwaitingProofs,
    Completed,
    Expired,
    Cancelled,
}

/// The persisted `anchors` store record: `vcCID -> {linksetCID, state,
/// proofs[]}` per spec.md §6's "Persisted layout".
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnchorRecord {
    pub vc_cid: Cid,
    pub anchor_cid: Cid,
    pub batch_cid: Cid,
    pub vc: AnchorCredential,
    pub state: AnchorState,
    pub proofs: Vec<WitnessProof>,
    pub created_at: DateTime<Utc>,
    /// Set once the anchor event has been announced and observed as
    /// published — see C6 step 4.
    pub published: bool,
}

//! Resolver output types: the derived `DIDView` (document + metadata),
//! never itself authoritative — always recomputed from the operation log.
//! See spec.md §3 "DIDView" and §4.7.

use crate::ids::Cid;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The resolution view's lifecycle stage.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum ResolutionStatus {
    /// Accepted locally, not yet published under any anchor.
    Interim,
    /// At least one anchor containing the operation is published.
    Published,
    /// A `deactivate` operation has been applied; no further operations are
    /// accepted for this suffix.
    Deactivated,
}

/// A DID document, in the minimal shape the anchor pipeline actually needs
/// to reason about (public keys + opaque service/method-specific payload).
/// Full DID-document JSON-LD construction is the REST frontend's concern;
/// this is the resolver's internal replay output.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DidDocument {
    pub public_keys: Vec<String>,
    pub services: Vec<String>,
}

/// Derived metadata the resolver attaches to every resolution result.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DidMetadata {
    /// `did:orb:{anchorCID}:{suffix}`, present once `status != Interim`.
    pub canonical_id: Option<String>,
    /// Alternative hint-bearing forms for the same DID.
    pub equivalent_id: Vec<String>,
    pub status: ResolutionStatus,
    /// Update/recovery commitments still outstanding on the document.
    pub update_commitment: Option<String>,
    pub recovery_commitment: Option<String>,
    /// Anchor CIDs of every operation folded into this view, in applied
    /// order.
    pub previous_operations: Vec<Cid>,
    /// Malformed log entries skipped during replay, annotated rather than
    /// treated as fatal (spec.md §4.7 failure semantics).
    pub annotations: Vec<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DidView {
    pub document: DidDocument,
    pub metadata: DidMetadata,
}

/// Selects which prefix of a suffix's operation log the "Versioned" view
/// replays, per SPEC_FULL.md's supplement to spec.md §4.7.
#[derive(Clone, Debug)]
pub enum VersionSelector {
    Id(Cid),
    Time(DateTime<Utc>),
}

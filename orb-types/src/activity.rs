//! ActivityPub activities: a tagged variant over the closed set C5
//! dispatches on, per the "Polymorphism across activity types is expressed
//! as a tagged variant over the closed set in §4.5" design note.

use crate::anchor::{AnchorCredential, WitnessProof};
use crate::ids::{Cid, Iri};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The closed set of activity kinds C5's inbox handler table dispatches on
/// (spec.md §4.5).
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ActivityKind {
    /// A locally-originated anchor credential, announced to followers.
    Create {
        vc_cid: Cid,
        vc: AnchorCredential,
    },
    /// A forwarded `Create`, re-announced by a following relay.
    Announce { object: Iri },
    /// An anchor VC offered to a witness for countersignature.
    Offer {
        vc_cid: Cid,
        vc: AnchorCredential,
    },
    /// A witness's countersignature over a previously offered VC.
    Like { vc_cid: Cid, proof: WitnessProof },
    Follow { object: Iri },
    /// A request to become an anchor witness for the sender.
    Invite { object: Iri },
    Accept { object: Iri },
    Reject { object: Iri },
    /// Revert the effect of a previously sent activity, if it still applies.
    Undo { object: Iri },
}

impl ActivityKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ActivityKind::Create { .. } => "Create",
            ActivityKind::Announce { .. } => "Announce",
            ActivityKind::Offer { .. } => "Offer",
            ActivityKind::Like { .. } => "Like",
            ActivityKind::Follow { .. } => "Follow",
            ActivityKind::Invite { .. } => "Invite",
            ActivityKind::Accept { .. } => "Accept",
            ActivityKind::Reject { .. } => "Reject",
            ActivityKind::Undo { .. } => "Undo",
        }
    }
}

/// An activity envelope: the fields common to every kind, plus the kind
/// itself. Each activity has a stable IRI within its originator's actor
/// namespace: `{actorIri}/activities/{uuid}`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Activity {
    pub id: Iri,
    pub actor: Iri,
    pub to: Vec<Iri>,
    pub published: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: ActivityKind,
}

impl Activity {
    pub fn new(id: Iri, actor: Iri, to: Vec<Iri>, kind: ActivityKind) -> Self {
        Self {
            id,
            actor,
            to,
            published: Utc::now(),
            kind,
        }
    }
}

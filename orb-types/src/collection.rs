//! ActivityPub collections: ordered, paginated sets of IRIs served with
//! stable (insertion-time, ascending) ordering. See spec.md §3
//! "Collection" and §4.5's "single-producer paginated stream of IRIs".

use crate::ids::Iri;
use serde::{Deserialize, Serialize};

/// Default page size for collection pagination, per the `COLLECTION_PAGE_SIZE`
/// supplement in SPEC_FULL.md.
pub const DEFAULT_COLLECTION_PAGE_SIZE: usize = 100;

/// The named collections every actor exposes.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollectionKind {
    Inbox,
    Outbox,
    Followers,
    Following,
    Witnesses,
    Witnessing,
    Liked,
    Likes,
    Shares,
}

/// A summary of a collection: total size plus enough to build `first`/
/// `next` links without materialising every member.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CollectionSummary {
    pub kind: CollectionKind,
    pub total_items: usize,
}

/// One page of a collection: an ordered slice of IRIs plus the opaque
/// token for the next page, if any. The token is simply the index of the
/// first item of the next page into the ordered, append-only log backing
/// the collection — stable because entries are never reordered or removed,
/// only appended.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CollectionPage {
    pub items: Vec<Iri>,
    pub next_page_num: Option<usize>,
}

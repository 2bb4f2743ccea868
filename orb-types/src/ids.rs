//! Stable identifiers used across the anchor pipeline: DID suffixes and CAS
//! content identifiers. Both are newtypes over their canonical string form
//! so that equality/ordering is exactly byte-for-byte string comparison —
//! in particular `Cid`'s `Ord` impl is the lexicographic CID comparison the
//! canonical-history fork tie-break relies on.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A DID suffix: the stable, content-derived identifier for a DID (a
/// multihash of its suffix-data), unique over the global namespace.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct DidSuffix(pub String);

impl DidSuffix {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DidSuffix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DidSuffix {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A content identifier: the canonical base32-multihash string a CAS
/// returns from `Put`. Content-addressed, hence idempotent — writing the
/// same bytes twice yields the same `Cid`.
///
/// `Ord` here is the lexicographic CID comparison spec.md §4.7/§9 adopts as
/// the fork tie-break rule.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Cid(pub String);

impl Cid {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Cid {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// An IRI: every cross-entity reference (actor, activity, collection) is
/// stored as one of these rather than a pointer, per the "cyclic references
/// are avoided by storing IRIs" design note.
pub type Iri = String;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cid_ord_is_lexicographic() {
        let a = Cid::new("bafy000");
        let b = Cid::new("bafy111");
        assert!(a < b);
    }
}

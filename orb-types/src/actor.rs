//! ActivityPub actors: the document a service publishes about itself, and
//! the cached reference another service holds for one it doesn't own. See
//! spec.md §3 "Actor".

use crate::ids::Iri;
use serde::{Deserialize, Serialize};

/// An actor's public key material, as published in its actor document.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PublicKeyDoc {
    pub id: Iri,
    pub owner: Iri,
    /// Multibase-encoded Ed25519 public key.
    pub public_key_multibase: String,
}

/// The full actor document: `{iri, publicKey, inbox, outbox, followers,
/// following, witnesses, witnessing, liked, likes, shares}`. Owned
/// exclusively by the service it describes; other services hold cached
/// copies with a TTL (see `ActorCacheEntry`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActorDocument {
    pub iri: Iri,
    pub public_key: PublicKeyDoc,
    pub inbox: Iri,
    pub outbox: Iri,
    pub followers: Iri,
    pub following: Iri,
    pub witnesses: Iri,
    pub witnessing: Iri,
    pub liked: Iri,
    pub likes: Iri,
    pub shares: Iri,
}

/// A cached reference to a remote actor, used for policy lookups
/// (follow/invite acceptance, witness selection) without ever mutating the
/// remote actor's own state locally. Bounded-TTL, evicted in the
/// background.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActorCacheEntry {
    pub document: ActorDocument,
    pub cached_at: chrono::DateTime<chrono::Utc>,
    pub ttl_seconds: u64,
}

impl ActorCacheEntry {
    pub fn is_expired(&self, now: chrono::DateTime<chrono::Utc>) -> bool {
        let age = now.signed_duration_since(self.cached_at);
        age.num_seconds() as i64 > self.ttl_seconds as i64
    }
}

/// The accept-list policy governing `Follow`/`Invite(AnchorWitness)`
/// requests (`FOLLOW_AUTH_POLICY`/`INVITE_WITNESS_AUTH_POLICY`).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum AcceptListPolicy {
    AcceptAll,
    AcceptList,
}

impl AcceptListPolicy {
    pub fn from_env_str(s: &str) -> Self {
        match s {
            "accept-all" => AcceptListPolicy::AcceptAll,
            _ => AcceptListPolicy::AcceptList,
        }
    }
}

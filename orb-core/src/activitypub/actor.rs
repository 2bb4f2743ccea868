//! Actor documents (spec.md §3 "Actor"): the document a service publishes
//! about itself, and TTL'd cached references to actors it does not own.

use crate::kms::KmsClient;
use crate::store::OrbStore;
use chrono::Utc;
use orb_types::{ActorCacheEntry, ActorDocument, Iri, OrbError, PublicKeyDoc};
use std::sync::Arc;
use std::time::Duration;

type Result<T> = std::result::Result<T, OrbError>;

/// Build the local service's own actor document, anchored at
/// `external_endpoint` and `service_name`.
pub async fn build_local_actor(
    kms: &dyn KmsClient,
    external_endpoint: &str,
    service_name: &str,
    signing_key_id: &str,
) -> Result<ActorDocument> {
    let iri = format!("{external_endpoint}/services/{service_name}");
    let public_key_multibase = kms.export_public_key(signing_key_id).await?;
    Ok(ActorDocument {
        iri: iri.clone(),
        public_key: PublicKeyDoc {
            id: format!("{iri}#main-key"),
            owner: iri.clone(),
            public_key_multibase,
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
    })
}

/// Resolves remote actor documents through a TTL'd cache backed by the
/// store, fetching over HTTP on a cache miss or expiry. Policy lookups
/// (follow/invite acceptance, witness selection, signature verification)
/// go through this rather than touching the HTTP client directly.
pub struct ActorResolver {
    store: Arc<dyn OrbStore>,
    http: reqwest::Client,
    default_ttl: Duration,
}

impl ActorResolver {
    pub fn new(store: Arc<dyn OrbStore>, http: reqwest::Client, default_ttl: Duration) -> Self {
        Self {
            store,
            http,
            default_ttl,
        }
    }

    pub async fn resolve(&self, iri: &Iri) -> Result<ActorDocument> {
        if let Some(cached) = self.store.get_cached_actor(iri).await? {
            if !cached.is_expired(Utc::now()) {
                return Ok(cached.document);
            }
        }
        let document: ActorDocument = self
            .http
            .get(iri)
            .send()
            .await
            .map_err(|e| OrbError::TransientTransport(e.to_string()))?
            .json()
            .await
            .map_err(|e| OrbError::Validation(format!("malformed actor document: {e}")))?;

        self.store
            .cache_actor(ActorCacheEntry {
                document: document.clone(),
                cached_at: Utc::now(),
                ttl_seconds: self.default_ttl.as_secs(),
            })
            .await?;
        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kms::SoftwareKms;
    use crate::store_memory::MemoryStore;

    #[tokio::test]
    async fn local_actor_exposes_every_required_collection() {
        let kms = SoftwareKms::new();
        let actor = build_local_actor(&kms, "https://node.test", "orb", "service-key")
            .await
            .unwrap();
        assert_eq!(actor.iri, "https://node.test/services/orb");
        assert_eq!(actor.inbox, "https://node.test/services/orb/inbox");
        assert_eq!(actor.witnessing, "https://node.test/services/orb/witnessing");
    }

    #[tokio::test]
    async fn resolve_returns_unexpired_cached_document_without_http() {
        let store: Arc<dyn OrbStore> = Arc::new(MemoryStore::new());
        let kms = SoftwareKms::new();
        let document = build_local_actor(&kms, "https://peer.test", "bob", "bob-key")
            .await
            .unwrap();
        store
            .cache_actor(ActorCacheEntry {
                document: document.clone(),
                cached_at: Utc::now(),
                ttl_seconds: 3600,
            })
            .await
            .unwrap();
        let resolver = ActorResolver::new(store, reqwest::Client::new(), Duration::from_secs(3600));
        let resolved = resolver.resolve(&document.iri).await.unwrap();
        assert_eq!(resolved.iri, document.iri);
    }
}

//! Outbox (spec.md §4.5): append-only list of locally-originated
//! activities, each delivered to every IRI in its `to` set over a signed
//! HTTP POST. The delivery loop is the teacher's `OutboxDispatcher`
//! claim/process/retry/dead-letter shape, retargeted at HTTP delivery
//! instead of a projection write.

use crate::activitypub::actor::ActorResolver;
use crate::activitypub::signature::{digest_header, sign_request};
use crate::kms::KmsClient;
use crate::model::OutboxDelivery;
use crate::store::OrbStore;
use orb_types::{Activity, CollectionKind, Iri, OrbError};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

type Result<T> = std::result::Result<T, OrbError>;

pub struct Outbox {
    store: Arc<dyn OrbStore>,
    kms: Arc<dyn KmsClient>,
    actors: Arc<ActorResolver>,
    http: reqwest::Client,
    signing_key_id: String,
    max_attempts: u32,
}

impl Outbox {
    pub fn new(
        store: Arc<dyn OrbStore>,
        kms: Arc<dyn KmsClient>,
        actors: Arc<ActorResolver>,
        http: reqwest::Client,
        signing_key_id: String,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            kms,
            actors,
            http,
            signing_key_id,
            max_attempts,
        }
    }

    /// Record `activity` as originated locally and queue a delivery to
    /// every recipient in its `to` set, resolved from actor IRI to the
    /// actor's `inbox` endpoint. Recorded both in the idempotency seen-set
    /// and in the actor's own paginated outbox collection, so a peer's
    /// anchor-sync backfill (`TaskScheduler::anchor_sync_once`) has
    /// something to walk over `GET /services/{name}/outbox?page=true`.
    pub async fn post(&self, activity: Activity) -> Result<()> {
        self.store.save_outbox_activity(&activity).await?;
        self.store
            .append_collection_item(&activity.actor, CollectionKind::Outbox, activity.id.clone())
            .await?;
        for target in activity.to.clone() {
            let target_inbox = self.actors.resolve(&target).await?.inbox;
            self.store
                .enqueue_delivery(OutboxDelivery {
                    delivery_id: Uuid::new_v4(),
                    activity: activity.clone(),
                    target_inbox,
                    attempt_count: 0,
                })
                .await?;
        }
        Ok(())
    }

    async fn deliver(&self, activity: &Activity, target_inbox: &Iri) -> Result<()> {
        let body = serde_json::to_vec(activity).map_err(|e| OrbError::Fatal(e.to_string()))?;
        let digest = digest_header(&body);
        let date = chrono::Utc::now().to_rfc2822();
        let url = reqwest::Url::parse(target_inbox)
            .map_err(|e| OrbError::Validation(format!("bad target inbox url: {e}")))?;
        let signature = sign_request(
            self.kms.as_ref(),
            &self.signing_key_id,
            "POST",
            url.path(),
            &date,
            &digest,
        )
        .await?;

        let response = self
            .http
            .post(target_inbox)
            .header("Date", date)
            .header("Digest", digest)
            .header("Signature", signature)
            .header("Content-Type", "application/activity+json")
            .body(body)
            .send()
            .await
            .map_err(|e| OrbError::TransientTransport(e.to_string()))?;

        if response.status().is_success() {
            return Ok(());
        }
        if response.status().is_server_error() {
            return Err(OrbError::TransientTransport(format!(
                "{target_inbox} returned {}",
                response.status()
            )));
        }
        Err(OrbError::Validation(format!(
            "{target_inbox} rejected delivery with {}",
            response.status()
        )))
    }

    /// One claim/process/retry/dead-letter cycle, called in a loop by the
    /// background dispatcher task.
    pub async fn dispatch_once(&self, claimer: &str) -> Result<bool> {
        let delivery = match self.store.claim_next_delivery(claimer).await? {
            Some(delivery) => delivery,
            None => return Ok(false),
        };
        debug!(delivery_id = %delivery.delivery_id, target = %delivery.target_inbox, "dispatching activity");

        match self.deliver(&delivery.activity, &delivery.target_inbox).await {
            Ok(()) => {
                self.store.mark_delivery_processed(delivery.delivery_id).await?;
            }
            Err(err) if err.is_retryable() && delivery.attempt_count + 1 < self.max_attempts => {
                warn!(delivery_id = %delivery.delivery_id, %err, attempt = delivery.attempt_count + 1, "delivery failed, will retry");
                self.store
                    .record_delivery_failure(delivery.delivery_id, delivery.attempt_count + 1)
                    .await?;
            }
            Err(err) => {
                error!(delivery_id = %delivery.delivery_id, %err, "delivery parked after exhausting retries or non-retryable failure");
                self.store
                    .park_delivery(delivery.delivery_id, &err.to_string())
                    .await?;
            }
        }
        Ok(true)
    }

    /// Run the dispatcher loop, sleeping `idle_interval` between empty
    /// polls. Spawn as a background task.
    pub async fn run(&self, claimer: &str, idle_interval: Duration) {
        info!(claimer, "outbox dispatcher started");
        loop {
            match self.dispatch_once(claimer).await {
                Ok(true) => continue,
                Ok(false) => tokio::time::sleep(idle_interval).await,
                Err(err) => {
                    error!(%err, "outbox dispatcher tick failed");
                    tokio::time::sleep(idle_interval).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kms::SoftwareKms;
    use crate::store_memory::MemoryStore;
    use orb_types::{ActivityKind, ActorCacheEntry, ActorDocument, PublicKeyDoc};
    use std::time::Duration as StdDuration;

    fn sample_activity(to: Vec<Iri>) -> Activity {
        Activity::new(
            "https://node.test/services/orb/activities/1".to_string(),
            "https://node.test/services/orb".to_string(),
            to,
            ActivityKind::Follow {
                object: "https://peer.test/services/bob".to_string(),
            },
        )
    }

    async fn seed_cached_actor(store: &Arc<dyn OrbStore>, iri: &str) {
        store
            .cache_actor(ActorCacheEntry {
                document: ActorDocument {
                    iri: iri.to_string(),
                    public_key: PublicKeyDoc {
                        id: format!("{iri}#main-key"),
                        owner: iri.to_string(),
                        public_key_multibase: "z6MkTest".to_string(),
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
                },
                cached_at: chrono::Utc::now(),
                ttl_seconds: 3600,
            })
            .await
            .unwrap();
    }

    fn make_outbox(store: Arc<dyn OrbStore>, max_attempts: u32) -> Outbox {
        let actors = Arc::new(ActorResolver::new(store.clone(), reqwest::Client::new(), StdDuration::from_secs(60)));
        Outbox::new(
            store,
            Arc::new(SoftwareKms::new()),
            actors,
            reqwest::Client::new(),
            "service-key".to_string(),
            max_attempts,
        )
    }

    #[tokio::test]
    async fn post_enqueues_one_delivery_per_recipient() {
        let store: Arc<dyn OrbStore> = Arc::new(MemoryStore::new());
        seed_cached_actor(&store, "https://peer.test/services/bob").await;
        seed_cached_actor(&store, "https://peer.test/services/carol").await;
        let outbox = make_outbox(store.clone(), 5);
        let activity = sample_activity(vec![
            "https://peer.test/services/bob".to_string(),
            "https://peer.test/services/carol".to_string(),
        ]);
        outbox.post(activity).await.unwrap();

        let first = store.claim_next_delivery("w1").await.unwrap();
        let second = store.claim_next_delivery("w2").await.unwrap();
        assert!(first.is_some());
        assert!(second.is_some());
        assert!(store.claim_next_delivery("w3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unreachable_target_is_retried_then_parked() {
        let store: Arc<dyn OrbStore> = Arc::new(MemoryStore::new());
        seed_cached_actor(&store, "https://127.0.0.1:1").await;
        let outbox = make_outbox(store.clone(), 1);
        let activity = sample_activity(vec!["https://127.0.0.1:1".to_string()]);
        outbox.post(activity).await.unwrap();
        assert!(outbox.dispatch_once("w1").await.unwrap());
        let parked = store.list_parked_deliveries().await.unwrap();
        assert_eq!(parked.len(), 1);
    }
}

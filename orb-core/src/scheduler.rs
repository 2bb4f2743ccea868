//! Task Scheduler (C8): the background loops that keep a node converging
//! without client traffic — witness-offer expiry, explicit re-queuing of
//! expired anchors' operations, inbox backfill from followed peers, and
//! actor-cache eviction (spec.md §4.8).
//!
//! `MAINTENANCE_MODE_ENABLED` gates [`crate::queue::OperationQueue::publish`]
//! only (spec.md §9's resolved open question) — none of these loops check
//! it, a node in maintenance mode still drains witness offers, re-queues
//! expired anchors, and backfills federation while refusing new admissions.

use crate::activitypub::inbox::AnchorIngest;
use crate::queue::OperationQueue;
use crate::store::OrbStore;
use crate::witness::WitnessCollector;
use chrono::Utc;
use orb_types::{ActivityKind, AnchorState, CollectionKind, Iri};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

type Result<T> = std::result::Result<T, orb_types::OrbError>;

/// A remote actor's outbox, served the same `OrderedCollectionPage` shape
/// this node serves its own — federation peers are assumed to be other
/// Orb-compatible nodes.
#[derive(Debug, serde::Deserialize)]
struct RemoteCollectionPage {
    items: Vec<Iri>,
}

pub struct TaskScheduler {
    store: Arc<dyn OrbStore>,
    witnesses: Arc<WitnessCollector>,
    queue: Arc<OperationQueue>,
    anchor_ingest: Arc<dyn AnchorIngest>,
    http: reqwest::Client,
    local_actor_iri: Iri,
    witness_timeout: Duration,
    task_manager_check_interval: Duration,
    anchor_event_sync_interval: Duration,
    vct_monitoring_interval: Duration,
}

impl TaskScheduler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn OrbStore>,
        witnesses: Arc<WitnessCollector>,
        queue: Arc<OperationQueue>,
        anchor_ingest: Arc<dyn AnchorIngest>,
        http: reqwest::Client,
        local_actor_iri: Iri,
        witness_timeout: Duration,
        task_manager_check_interval: Duration,
        anchor_event_sync_interval: Duration,
        vct_monitoring_interval: Duration,
    ) -> Self {
        Self {
            store,
            witnesses,
            queue,
            anchor_ingest,
            http,
            local_actor_iri,
            witness_timeout,
            task_manager_check_interval,
            anchor_event_sync_interval,
            vct_monitoring_interval,
        }
    }

    /// Spawn the four loops as independent tasks, returning their handles
    /// for the caller to hold (or abort, in tests).
    pub fn spawn_all(self: Arc<Self>) -> Vec<tokio::task::JoinHandle<()>> {
        vec![
            self.clone().spawn_loop(self.task_manager_check_interval, |s| async move {
                s.witness_expiry_once().await
            }),
            self.clone().spawn_loop(self.task_manager_check_interval, |s| async move {
                s.operation_gc_once().await
            }),
            self.clone().spawn_loop(self.anchor_event_sync_interval, |s| async move {
                s.anchor_sync_once().await
            }),
            self.clone().spawn_loop(self.vct_monitoring_interval, |s| async move {
                s.actor_cache_refresh_once().await
            }),
        ]
    }

    fn spawn_loop<F, Fut>(self: Arc<Self>, interval: Duration, run: F) -> tokio::task::JoinHandle<()>
    where
        F: Fn(Arc<Self>) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(err) = run(self.clone()).await {
                    warn!(%err, "scheduled task failed, will retry next tick");
                }
            }
        })
    }

    /// Force-expire any anchor still `AwaitingProofs` past `WITNESS_TIMEOUT`.
    pub async fn witness_expiry_once(&self) -> Result<()> {
        let cutoff = Utc::now() - chrono::Duration::from_std(self.witness_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(30));
        let stale = self.store.anchors_awaiting_proofs_older_than(cutoff).await?;
        for anchor in &stale {
            info!(vc_cid = %anchor.vc_cid, "expiring anchor past witness timeout");
            self.witnesses.expire(&anchor.vc_cid).await?;
        }
        Ok(())
    }

    /// Re-queue the operations of every `Expired` anchor. Spec.md §4.4 is
    /// explicit that these are never silently re-batched by C2 — this is
    /// the task that performs the explicit re-queuing.
    pub async fn operation_gc_once(&self) -> Result<()> {
        let expired = self.store.list_anchors_by_state(AnchorState::Expired).await?;
        for anchor in &expired {
            let Some(batch) = self.store.load_batch(&anchor.batch_cid).await? else {
                warn!(batch_cid = %anchor.batch_cid, "expired anchor's batch is gone, cannot re-queue");
                continue;
            };
            for operation in batch.operations {
                if let Err(err) = self.queue.publish(operation).await {
                    warn!(%err, vc_cid = %anchor.vc_cid, "failed to re-queue operation from expired anchor");
                }
            }
            self.store
                .update_anchor_state(&anchor.vc_cid, AnchorState::Cancelled)
                .await?;
        }
        Ok(())
    }

    /// Backfill: walk every followed actor's outbox and forward any
    /// `Create`/`Announce` not already seen, satisfying the "node rejoins
    /// and backfills the anchors it missed while offline" scenario without
    /// requiring a durable per-actor sync cursor — correctness here rests
    /// entirely on the inbox's own `inbox_seen` dedup, so re-scanning the
    /// same page repeatedly is wasted work, not a hazard.
    pub async fn anchor_sync_once(&self) -> Result<()> {
        let following_summary = self
            .store
            .collection_summary(&self.local_actor_iri, CollectionKind::Following)
            .await?;
        let following = self
            .store
            .collection_page(
                &self.local_actor_iri,
                CollectionKind::Following,
                0,
                following_summary.total_items.max(1),
            )
            .await?;

        for peer_iri in following.items {
            if let Err(err) = self.sync_peer(&peer_iri).await {
                warn!(%err, peer = %peer_iri, "anchor sync with followed peer failed");
            }
        }
        Ok(())
    }

    async fn sync_peer(&self, peer_iri: &str) -> Result<()> {
        let outbox_url = format!("{}/outbox?page=true&page-num=0", peer_iri.trim_end_matches('/'));
        let page: RemoteCollectionPage = self
            .http
            .get(&outbox_url)
            .send()
            .await
            .map_err(|e| orb_types::OrbError::TransientTransport(e.to_string()))?
            .json()
            .await
            .map_err(|e| orb_types::OrbError::Validation(format!("malformed outbox page: {e}")))?;

        for activity_iri in page.items {
            if self.store.inbox_seen(&activity_iri).await? {
                continue;
            }
            let activity: orb_types::Activity = self
                .http
                .get(&activity_iri)
                .send()
                .await
                .map_err(|e| orb_types::OrbError::TransientTransport(e.to_string()))?
                .json()
                .await
                .map_err(|e| orb_types::OrbError::Validation(format!("malformed activity: {e}")))?;
            if !matches!(activity.kind, ActivityKind::Create { .. } | ActivityKind::Announce { .. }) {
                continue;
            }
            self.store.mark_inbox_seen(&activity.id).await?;
            self.anchor_ingest.ingest(activity).await?;
        }
        Ok(())
    }

    /// Evict expired remote-actor cache entries.
    pub async fn actor_cache_refresh_once(&self) -> Result<()> {
        let evicted = self.store.evict_expired_actors(Utc::now()).await?;
        if evicted > 0 {
            info!(evicted, "evicted expired actor cache entries");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activitypub::inbox::{OutboxAnnouncer, OutboxOfferDispatcher};
    use crate::activitypub::outbox::Outbox;
    use crate::bus::InProcessBus;
    use crate::kms::{KmsClient, SoftwareKms};
    use crate::store_memory::MemoryStore;
    use crate::witness::WitnessPolicy;
    use orb_types::{AnchorCredential, Batch, Cid, DidSuffix, Operation, OperationType};

    fn scheduler_for(store: Arc<dyn OrbStore>) -> TaskScheduler {
        let kms: Arc<dyn KmsClient> = Arc::new(SoftwareKms::new());
        let actors = Arc::new(crate::activitypub::actor::ActorResolver::new(
            store.clone(),
            reqwest::Client::new(),
            Duration::from_secs(3600),
        ));
        let outbox = Arc::new(Outbox::new(
            store.clone(),
            kms.clone(),
            actors,
            reqwest::Client::new(),
            "service-key".to_string(),
            3,
        ));
        let local_actor_iri = "https://node.test/services/orb".to_string();

        struct NoopIngest;
        #[async_trait::async_trait]
        impl AnchorIngest for NoopIngest {
            async fn ingest(&self, _activity: orb_types::Activity) -> Result<()> {
                Ok(())
            }
        }

        let witnesses = Arc::new(WitnessCollector::new(
            store.clone(),
            Arc::new(OutboxOfferDispatcher {
                outbox: outbox.clone(),
                local_actor_iri: local_actor_iri.clone(),
            }),
            Arc::new(OutboxAnnouncer {
                outbox: outbox.clone(),
                store: store.clone(),
                local_actor_iri: local_actor_iri.clone(),
                anchor_ingest: Arc::new(NoopIngest),
            }),
            local_actor_iri.clone(),
            WitnessPolicy {
                min_percent: 100,
                log_required: false,
                role: None,
            },
        ));
        let bus = Arc::new(InProcessBus::new(2));
        let queue = Arc::new(OperationQueue::new(
            bus,
            Arc::new(crate::resolver::Resolver::new(store.clone())),
            false,
        ));

        TaskScheduler::new(
            store,
            witnesses,
            queue,
            Arc::new(NoopIngest),
            reqwest::Client::new(),
            local_actor_iri,
            Duration::from_millis(10),
            Duration::from_millis(10),
            Duration::from_millis(10),
            Duration::from_millis(10),
        )
    }

    fn sample_op(suffix: &str) -> Operation {
        Operation {
            op_type: OperationType::Create,
            did_suffix: DidSuffix::new(suffix),
            delta_commitment: "c1".to_string(),
            reveal_value: "".to_string(),
            signed_data: "s".to_string(),
            anchor_origin: "https://node.test".to_string(),
        }
    }

    #[tokio::test]
    async fn operation_gc_requeues_expired_anchor_operations() {
        let store: Arc<dyn OrbStore> = Arc::new(MemoryStore::new());
        let batch = Batch {
            chunk_file_cid: Cid::new("bafychunk"),
            provisional_index_cid: None,
            core_index_cid: Cid::new("bafycore"),
            operations: vec![sample_op("s1")],
        };
        store.save_batch(&batch).await.unwrap();

        let vc_cid = Cid::new("bafyvc");
        store
            .save_anchor(&orb_types::AnchorRecord {
                vc_cid: vc_cid.clone(),
                anchor_cid: Cid::new("bafyanchor"),
                batch_cid: batch.core_index_cid.clone(),
                vc: AnchorCredential {
                    credential_subject: Cid::new("bafyanchor"),
                    issuer: "https://node.test/services/orb".to_string(),
                    issuance_date: Utc::now(),
                    proof: "proof".to_string(),
                },
                state: AnchorState::Expired,
                proofs: vec![],
                created_at: Utc::now(),
                published: false,
            })
            .await
            .unwrap();

        let scheduler = scheduler_for(store.clone());
        scheduler.operation_gc_once().await.unwrap();

        let record = store.load_anchor(&vc_cid).await.unwrap().unwrap();
        assert_eq!(record.state, AnchorState::Cancelled);
    }

    #[tokio::test]
    async fn actor_cache_refresh_evicts_expired_entries() {
        let store: Arc<dyn OrbStore> = Arc::new(MemoryStore::new());
        let scheduler = scheduler_for(store);
        scheduler.actor_cache_refresh_once().await.unwrap();
    }
}

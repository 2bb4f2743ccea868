//! Inbox (spec.md §4.5): signed POST ingestion, duplicate suppression,
//! and the handler dispatch table. Each handler is responsible for its
//! own idempotency (spec.md §5) — this module only guards against
//! re-processing the same activity IRI twice.

use crate::activitypub::outbox::Outbox;
use crate::kms::KmsClient;
use crate::model::AcceptListName;
use crate::store::OrbStore;
use crate::witness::{AnchorAnnouncer, OfferDispatcher, WitnessCollector};
use async_trait::async_trait;
use chrono::Utc;
use orb_types::{AcceptListPolicy, Activity, ActivityKind, CollectionKind, Iri, OrbError, WitnessProof};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

type Result<T> = std::result::Result<T, OrbError>;

/// Forwards `Create`/`Announce` activities carrying anchor events to C6.
/// Kept as a trait so this module never depends on the observer directly.
#[async_trait]
pub trait AnchorIngest: Send + Sync {
    async fn ingest(&self, activity: Activity) -> Result<()>;
}

/// Which kind of outbound request is still awaiting an `Accept`/`Reject`,
/// tracked so that an inbound `Accept(object)` knows whether to grow
/// Following or Witnesses. Not part of the persisted data model (spec.md
/// §3 has no type for it) — an in-process registry is sufficient since a
/// dropped in-flight request on crash just means the eventual `Accept`
/// arrives with nothing to resolve against, which this module treats as a
/// no-op rather than a defect.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum PendingRequestKind {
    Follow,
    Invite,
}

pub struct Inbox {
    store: Arc<dyn OrbStore>,
    outbox: Arc<Outbox>,
    kms: Arc<dyn KmsClient>,
    witness_collector: Arc<WitnessCollector>,
    anchor_ingest: Arc<dyn AnchorIngest>,
    local_actor_iri: Iri,
    signing_key_id: String,
    follow_policy: AcceptListPolicy,
    invite_policy: AcceptListPolicy,
    pending: Mutex<HashMap<Iri, PendingRequestKind>>,
}

impl Inbox {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn OrbStore>,
        outbox: Arc<Outbox>,
        kms: Arc<dyn KmsClient>,
        witness_collector: Arc<WitnessCollector>,
        anchor_ingest: Arc<dyn AnchorIngest>,
        local_actor_iri: Iri,
        signing_key_id: String,
        follow_policy: AcceptListPolicy,
        invite_policy: AcceptListPolicy,
    ) -> Self {
        Self {
            store,
            outbox,
            kms,
            witness_collector,
            anchor_ingest,
            local_actor_iri,
            signing_key_id,
            follow_policy,
            invite_policy,
            pending: Mutex::new(HashMap::new()),
        }
    }

    /// Send a `Follow` to `target`, remembering it as pending so a later
    /// `Accept` grows Following rather than Witnesses.
    pub async fn send_follow(&self, target: Iri) -> Result<()> {
        self.pending
            .lock()
            .await
            .insert(target.clone(), PendingRequestKind::Follow);
        self.send_request(target, |object| ActivityKind::Follow { object }).await
    }

    /// Send an `Invite(AnchorWitness)` to `target`.
    pub async fn send_invite(&self, target: Iri) -> Result<()> {
        self.pending
            .lock()
            .await
            .insert(target.clone(), PendingRequestKind::Invite);
        self.send_request(target, |object| ActivityKind::Invite { object }).await
    }

    async fn send_request(&self, target: Iri, kind: impl FnOnce(Iri) -> ActivityKind) -> Result<()> {
        let activity = Activity::new(
            format!("{}/activities/{}", self.local_actor_iri, uuid::Uuid::new_v4()),
            self.local_actor_iri.clone(),
            vec![target.clone()],
            kind(target),
        );
        self.outbox.post(activity).await
    }

    /// Process one inbound activity. Returns `Ok(())` for activities that
    /// were accepted (including policy-rejected ones, which still get a
    /// `Reject` reply) — errors are reserved for auth/validation failures
    /// the caller should turn into an HTTP error response.
    pub async fn handle(&self, activity: Activity) -> Result<()> {
        if self.store.inbox_seen(&activity.id).await? {
            return Ok(());
        }
        self.store.mark_inbox_seen(&activity.id).await?;

        match activity.kind.clone() {
            ActivityKind::Follow { .. } => self.handle_follow(activity).await,
            ActivityKind::Invite { .. } => self.handle_invite(activity).await,
            ActivityKind::Accept { object } => self.handle_accept(activity.actor, object).await,
            ActivityKind::Reject { object } => self.handle_reject(activity.actor, object).await,
            ActivityKind::Undo { object } => self.handle_undo(activity.actor, object).await,
            ActivityKind::Offer { vc_cid, vc } => self.handle_offer(activity.actor, vc_cid, vc).await,
            ActivityKind::Like { vc_cid, proof } => {
                self.witness_collector.handle_like(&vc_cid, proof).await
            }
            ActivityKind::Create { .. } | ActivityKind::Announce { .. } => {
                self.anchor_ingest.ingest(activity).await
            }
        }
    }

    async fn handle_follow(&self, activity: Activity) -> Result<()> {
        let requester = activity.actor.clone();
        let accepted = self.passes_policy(self.follow_policy, AcceptListName::Follow, &requester).await?;
        if accepted {
            self.store
                .append_collection_item(&self.local_actor_iri, CollectionKind::Followers, requester.clone())
                .await?;
        }
        self.reply(&activity, accepted).await
    }

    async fn handle_invite(&self, activity: Activity) -> Result<()> {
        let requester = activity.actor.clone();
        let accepted = self.passes_policy(self.invite_policy, AcceptListName::Witness, &requester).await?;
        if accepted {
            self.store
                .append_collection_item(&self.local_actor_iri, CollectionKind::Witnessing, requester.clone())
                .await?;
        }
        self.reply(&activity, accepted).await
    }

    async fn passes_policy(&self, policy: AcceptListPolicy, list: AcceptListName, requester: &str) -> Result<bool> {
        Ok(match policy {
            AcceptListPolicy::AcceptAll => true,
            AcceptListPolicy::AcceptList => self.store.accept_list_contains(list, requester).await?,
        })
    }

    async fn reply(&self, original: &Activity, accepted: bool) -> Result<()> {
        let kind = if accepted {
            ActivityKind::Accept { object: original.id.clone() }
        } else {
            ActivityKind::Reject { object: original.id.clone() }
        };
        let reply = Activity::new(
            format!("{}/activities/{}", self.local_actor_iri, uuid::Uuid::new_v4()),
            self.local_actor_iri.clone(),
            vec![original.actor.clone()],
            kind,
        );
        self.outbox.post(reply).await
    }

    async fn handle_accept(&self, accepter: Iri, _object: Iri) -> Result<()> {
        let kind = self.pending.lock().await.remove(&accepter);
        match kind {
            Some(PendingRequestKind::Follow) => {
                self.store
                    .append_collection_item(&self.local_actor_iri, CollectionKind::Following, accepter)
                    .await
            }
            Some(PendingRequestKind::Invite) => {
                self.store
                    .append_collection_item(&self.local_actor_iri, CollectionKind::Witnesses, accepter)
                    .await
            }
            None => {
                warn!(%accepter, "received Accept with no matching pending request");
                Ok(())
            }
        }
    }

    async fn handle_reject(&self, rejecter: Iri, _object: Iri) -> Result<()> {
        self.pending.lock().await.remove(&rejecter);
        Ok(())
    }

    async fn handle_undo(&self, actor: Iri, _object: Iri) -> Result<()> {
        for kind in [
            CollectionKind::Followers,
            CollectionKind::Following,
            CollectionKind::Witnesses,
            CollectionKind::Witnessing,
        ] {
            if self.store.collection_contains(&self.local_actor_iri, kind, &actor).await? {
                self.store.collection_remove(&self.local_actor_iri, kind, &actor).await?;
            }
        }
        Ok(())
    }

    async fn handle_offer(
        &self,
        offerer: Iri,
        vc_cid: orb_types::Cid,
        vc: orb_types::AnchorCredential,
    ) -> Result<()> {
        let is_witnessing = self
            .store
            .collection_contains(&self.local_actor_iri, CollectionKind::Witnessing, &offerer)
            .await?;
        if !is_witnessing {
            info!(%offerer, "declining offer from actor we are not witnessing for");
            return Ok(());
        }
        let payload = serde_json::to_vec(&vc).map_err(|e| OrbError::Fatal(e.to_string()))?;
        let signed_proof_doc = self.kms.sign(&self.signing_key_id, &payload).await?;
        let like = Activity::new(
            format!("{}/activities/{}", self.local_actor_iri, uuid::Uuid::new_v4()),
            self.local_actor_iri.clone(),
            vec![offerer],
            ActivityKind::Like {
                vc_cid,
                proof: WitnessProof {
                    witness_iri: self.local_actor_iri.clone(),
                    signed_proof_doc,
                    timestamp: Utc::now(),
                },
            },
        );
        self.outbox.post(like).await
    }
}

/// Blanket adapter so `WitnessCollector`'s `OfferDispatcher`/`AnchorAnnouncer`
/// ports can be satisfied by the same outbox this module posts through,
/// without C4 depending on activity-kind construction directly.
pub struct OutboxOfferDispatcher {
    pub outbox: Arc<Outbox>,
    pub local_actor_iri: Iri,
}

#[async_trait]
impl OfferDispatcher for OutboxOfferDispatcher {
    async fn dispatch_offer(&self, witness_iri: &Iri, vc_cid: orb_types::Cid, vc: orb_types::AnchorCredential) -> Result<()> {
        let activity = Activity::new(
            format!("{}/activities/{}", self.local_actor_iri, uuid::Uuid::new_v4()),
            self.local_actor_iri.clone(),
            vec![witness_iri.clone()],
            ActivityKind::Offer { vc_cid, vc },
        );
        self.outbox.post(activity).await
    }
}

/// Broadcasts a completed anchor to followers and threads its operations
/// into this node's own per-suffix log through the same [`AnchorIngest`]
/// path a remote follower's inbox would use — the anchoring node is one of
/// its own observers, so local resolution never depends on a federation
/// round trip back to itself.
pub struct OutboxAnnouncer {
    pub outbox: Arc<Outbox>,
    pub store: Arc<dyn OrbStore>,
    pub local_actor_iri: Iri,
    pub anchor_ingest: Arc<dyn AnchorIngest>,
}

#[async_trait]
impl AnchorAnnouncer for OutboxAnnouncer {
    async fn announce_completed(&self, vc_cid: orb_types::Cid) -> Result<()> {
        let record = self
            .store
            .load_anchor(&vc_cid)
            .await?
            .ok_or_else(|| OrbError::NotFound(format!("completed anchor {vc_cid} vanished")))?;
        let followers_summary = self
            .store
            .collection_summary(&self.local_actor_iri, CollectionKind::Followers)
            .await?;
        let followers = self
            .store
            .collection_page(
                &self.local_actor_iri,
                CollectionKind::Followers,
                0,
                followers_summary.total_items.max(1),
            )
            .await?;
        let create = Activity::new(
            format!("{}/activities/{}", self.local_actor_iri, uuid::Uuid::new_v4()),
            self.local_actor_iri.clone(),
            followers.items,
            ActivityKind::Create {
                vc_cid,
                vc: record.vc,
            },
        );
        self.anchor_ingest.ingest(create.clone()).await?;
        self.outbox.post(create).await?;
        self.store.mark_anchor_published(&record.vc_cid).await
    }
}

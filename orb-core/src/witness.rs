//! Witness Collector (C4): the state machine of spec.md §4.4, run as one
//! mailbox actor per in-flight anchor event so concurrent `Like` arrivals
//! for the same event are serialised through the actor rather than a
//! shared mutex — the same single-threaded-task-over-a-channel shape as
//! `monocoque`'s pub/sub hub, scoped to a single VC instead of a whole
//! broker.
//!
//! ```text
//!   Pending ──offer sent──▶ AwaitingProofs
//!   AwaitingProofs ── proofs satisfy policy ──▶ Completed
//!   AwaitingProofs ── expiry elapsed w/o policy ──▶ Expired
//!   Pending ── witness selection empty (self-witness allowed) ──▶ Completed
//!   any  ── deactivation ──▶ Cancelled
//! ```

use crate::store::OrbStore;
use async_trait::async_trait;
use orb_types::{AnchorCredential, AnchorState, Cid, CollectionKind, Iri, OrbError, WitnessProof};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{info, warn};

type Result<T> = std::result::Result<T, OrbError>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WitnessRole {
    Batch,
    System,
}

/// The attributes a witness carries for policy evaluation. Not part of the
/// wire data model (spec.md §3 never names this type) — it's the boolean
/// expression's operand, supplied by whatever registers witnesses locally.
#[derive(Clone, Debug)]
pub struct WitnessAttributes {
    pub iri: Iri,
    pub role: WitnessRole,
    pub log_required: bool,
}

/// `minPercent`/`logRequired`/`role` boolean expression over witness
/// attributes, per spec.md §4.4.
#[derive(Clone, Debug)]
pub struct WitnessPolicy {
    pub min_percent: u8,
    pub log_required: bool,
    pub role: Option<WitnessRole>,
}

impl WitnessPolicy {
    fn eligible<'a>(&self, witnesses: &'a [WitnessAttributes]) -> Vec<&'a WitnessAttributes> {
        witnesses
            .iter()
            .filter(|w| self.role.map(|r| r == w.role).unwrap_or(true))
            .filter(|w| !self.log_required || w.log_required)
            .collect()
    }

    /// True if `proofs` satisfies this policy against the eligible subset
    /// of `witnesses`. An empty eligible set is vacuously satisfied —
    /// spec.md's "witness selection empty (self-witness allowed)" edge.
    pub fn is_satisfied(&self, witnesses: &[WitnessAttributes], proofs: &[WitnessProof]) -> bool {
        let eligible = self.eligible(witnesses);
        if eligible.is_empty() {
            return true;
        }
        let satisfied = eligible
            .iter()
            .filter(|w| proofs.iter().any(|p| p.witness_iri == w.iri))
            .count();
        let required = ((self.min_percent as usize) * eligible.len()).div_ceil(100);
        satisfied >= required.max(1)
    }
}

/// Dispatches an `Offer(vc)` activity to a witness's inbox. Implemented by
/// C5's outbox so C4 never depends on ActivityPub wire types directly.
#[async_trait]
pub trait OfferDispatcher: Send + Sync {
    async fn dispatch_offer(&self, witness_iri: &Iri, vc_cid: Cid, vc: AnchorCredential) -> Result<()>;
}

/// Notified once an anchor event reaches `Completed`, so C5 can broadcast
/// `Create`/`Announce`.
#[async_trait]
pub trait AnchorAnnouncer: Send + Sync {
    async fn announce_completed(&self, vc_cid: Cid) -> Result<()>;
}

enum WitnessCommand {
    Like(WitnessProof),
    Expire,
    Cancel,
}

/// Owns the set of currently-running per-event actors and the machinery to
/// start one for a freshly-built anchor.
pub struct WitnessCollector {
    store: Arc<dyn OrbStore>,
    offers: Arc<dyn OfferDispatcher>,
    announcer: Arc<dyn AnchorAnnouncer>,
    local_actor_iri: Iri,
    policy: WitnessPolicy,
    mailboxes: Arc<Mutex<HashMap<Cid, mpsc::Sender<WitnessCommand>>>>,
}

impl WitnessCollector {
    pub fn new(
        store: Arc<dyn OrbStore>,
        offers: Arc<dyn OfferDispatcher>,
        announcer: Arc<dyn AnchorAnnouncer>,
        local_actor_iri: Iri,
        policy: WitnessPolicy,
    ) -> Self {
        Self {
            store,
            offers,
            announcer,
            local_actor_iri,
            policy,
            mailboxes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Begin collection for a freshly-persisted, `Pending` anchor: select
    /// witnesses, transition to `AwaitingProofs` (or straight to
    /// `Completed` if selection is empty), and dispatch offers.
    pub async fn begin(&self, vc_cid: Cid, vc: AnchorCredential) -> Result<()> {
        let witnesses = self.selected_witnesses().await?;
        if witnesses.is_empty() {
            self.store.update_anchor_state(&vc_cid, AnchorState::Completed).await?;
            info!(%vc_cid, "no witnesses selected, self-witnessed and completed");
            self.announcer.announce_completed(vc_cid).await?;
            return Ok(());
        }

        self.store
            .update_anchor_state(&vc_cid, AnchorState::AwaitingProofs)
            .await?;

        let (tx, rx) = mpsc::channel(64);
        self.mailboxes.lock().await.insert(vc_cid.clone(), tx);
        self.spawn_event_actor(vc_cid.clone(), witnesses.clone(), rx);

        for witness in &witnesses {
            if let Err(err) = self
                .offers
                .dispatch_offer(&witness.iri, vc_cid.clone(), vc.clone())
                .await
            {
                warn!(%err, witness = %witness.iri, "offer dispatch failed, will be retried by the outbox worker");
            }
        }
        Ok(())
    }

    /// Route an inbound `Like(vcCID, proof)` to its event's mailbox. A
    /// `Like` for an event with no running actor (already terminal, or
    /// this node restarted) is dropped — idempotent by construction since
    /// the store already reflects the terminal state.
    pub async fn handle_like(&self, vc_cid: &Cid, proof: WitnessProof) -> Result<()> {
        let mailbox = self.mailboxes.lock().await.get(vc_cid).cloned();
        match mailbox {
            Some(tx) => {
                let _ = tx.send(WitnessCommand::Like(proof)).await;
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Force-expire an event, called by C8's witness-expiry task for
    /// anchors that have been `AwaitingProofs` past `WITNESS_TIMEOUT`.
    pub async fn expire(&self, vc_cid: &Cid) -> Result<()> {
        let mailbox = self.mailboxes.lock().await.get(vc_cid).cloned();
        match mailbox {
            Some(tx) => {
                let _ = tx.send(WitnessCommand::Expire).await;
                Ok(())
            }
            None => self.store.update_anchor_state(vc_cid, AnchorState::Expired).await,
        }
    }

    pub async fn cancel(&self, vc_cid: &Cid) -> Result<()> {
        let mailbox = self.mailboxes.lock().await.get(vc_cid).cloned();
        match mailbox {
            Some(tx) => {
                let _ = tx.send(WitnessCommand::Cancel).await;
                Ok(())
            }
            None => self.store.update_anchor_state(vc_cid, AnchorState::Cancelled).await,
        }
    }

    async fn selected_witnesses(&self) -> Result<Vec<WitnessAttributes>> {
        let summary = self
            .store
            .collection_summary(&self.local_actor_iri, CollectionKind::Witnesses)
            .await?;
        let page = self
            .store
            .collection_page(&self.local_actor_iri, CollectionKind::Witnesses, 0, summary.total_items.max(1))
            .await?;
        Ok(page
            .items
            .into_iter()
            .map(|iri| WitnessAttributes {
                iri,
                role: WitnessRole::Batch,
                log_required: false,
            })
            .collect())
    }

    fn spawn_event_actor(
        &self,
        vc_cid: Cid,
        witnesses: Vec<WitnessAttributes>,
        mut rx: mpsc::Receiver<WitnessCommand>,
    ) {
        let store = self.store.clone();
        let announcer = self.announcer.clone();
        let policy = self.policy.clone();
        let mailboxes_owner = vc_cid.clone();
        let mailboxes = self.mailboxes.clone();

        tokio::spawn(async move {
            while let Some(cmd) = rx.recv().await {
                let outcome = match cmd {
                    WitnessCommand::Like(proof) => {
                        Self::on_like(&store, &vc_cid, proof, &witnesses, &policy).await
                    }
                    WitnessCommand::Expire => {
                        let _ = store.update_anchor_state(&vc_cid, AnchorState::Expired).await;
                        Some(false)
                    }
                    WitnessCommand::Cancel => {
                        let _ = store.update_anchor_state(&vc_cid, AnchorState::Cancelled).await;
                        Some(false)
                    }
                };
                match outcome {
                    Some(true) => {
                        if let Err(err) = announcer.announce_completed(vc_cid.clone()).await {
                            warn!(%err, %vc_cid, "failed to announce completed anchor event");
                        }
                        break;
                    }
                    Some(false) => break,
                    None => continue,
                }
            }
            mailboxes.lock().await.remove(&mailboxes_owner);
        });
    }

    async fn on_like(
        store: &Arc<dyn OrbStore>,
        vc_cid: &Cid,
        proof: WitnessProof,
        witnesses: &[WitnessAttributes],
        policy: &WitnessPolicy,
    ) -> Option<bool> {
        if let Err(err) = store.append_witness_proof(vc_cid, proof).await {
            warn!(%err, %vc_cid, "failed to persist witness proof");
            return None;
        }
        let record = match store.load_anchor(vc_cid).await {
            Ok(Some(record)) => record,
            _ => return None,
        };
        if policy.is_satisfied(witnesses, &record.proofs) {
            if store
                .update_anchor_state(vc_cid, AnchorState::Completed)
                .await
                .is_ok()
            {
                return Some(true);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store_memory::MemoryStore;
    use chrono::Utc;
    use orb_types::{AnchorRecord, Cid};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn sample_vc(cid: &Cid) -> AnchorCredential {
        AnchorCredential {
            credential_subject: cid.clone(),
            issuer: "https://node.test/services/orb".to_string(),
            issuance_date: Utc::now(),
            proof: "proof-bytes".to_string(),
        }
    }

    fn sample_record(vc_cid: Cid) -> AnchorRecord {
        AnchorRecord {
            vc_cid: vc_cid.clone(),
            anchor_cid: Cid::new("bafyanchor"),
            batch_cid: Cid::new("bafybatch"),
            vc: sample_vc(&vc_cid),
            state: AnchorState::Pending,
            proofs: vec![],
            created_at: Utc::now(),
            published: false,
        }
    }

    struct NoopOffers;
    #[async_trait]
    impl OfferDispatcher for NoopOffers {
        async fn dispatch_offer(&self, _witness_iri: &Iri, _vc_cid: Cid, _vc: AnchorCredential) -> Result<()> {
            Ok(())
        }
    }

    struct CountingAnnouncer(Arc<AtomicUsize>);
    #[async_trait]
    impl AnchorAnnouncer for CountingAnnouncer {
        async fn announce_completed(&self, _vc_cid: Cid) -> Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn policy_vacuously_satisfied_with_no_eligible_witnesses() {
        let policy = WitnessPolicy {
            min_percent: 100,
            log_required: false,
            role: None,
        };
        assert!(policy.is_satisfied(&[], &[]));
    }

    #[test]
    fn policy_requires_minimum_percent_of_eligible_witnesses() {
        let policy = WitnessPolicy {
            min_percent: 51,
            log_required: false,
            role: None,
        };
        let witnesses = vec![
            WitnessAttributes {
                iri: "https://w1.test".to_string(),
                role: WitnessRole::Batch,
                log_required: false,
            },
            WitnessAttributes {
                iri: "https://w2.test".to_string(),
                role: WitnessRole::Batch,
                log_required: false,
            },
        ];
        let one_proof = vec![WitnessProof {
            witness_iri: "https://w1.test".to_string(),
            signed_proof_doc: "doc".to_string(),
            timestamp: Utc::now(),
        }];
        assert!(policy.is_satisfied(&witnesses, &one_proof));
        assert!(!policy.is_satisfied(&witnesses, &[]));
    }

    #[tokio::test]
    async fn begin_with_no_witnesses_completes_immediately() {
        let store: Arc<dyn OrbStore> = Arc::new(MemoryStore::new());
        let vc_cid = Cid::new("bafyvc1");
        store.save_anchor(&sample_record(vc_cid.clone())).await.unwrap();

        let announce_count = Arc::new(AtomicUsize::new(0));
        let collector = WitnessCollector::new(
            store.clone(),
            Arc::new(NoopOffers),
            Arc::new(CountingAnnouncer(announce_count.clone())),
            "https://node.test/services/orb".to_string(),
            WitnessPolicy {
                min_percent: 100,
                log_required: false,
                role: None,
            },
        );

        collector.begin(vc_cid.clone(), sample_vc(&vc_cid)).await.unwrap();
        let record = store.load_anchor(&vc_cid).await.unwrap().unwrap();
        assert_eq!(record.state, AnchorState::Completed);
        assert_eq!(announce_count.load(Ordering::SeqCst), 1);
    }
}

use crate::model::{AcceptListName, LogEntry, OutboxDelivery};
use crate::store::OrbStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orb_types::{
    ActorCacheEntry, Activity, AnchorRecord, AnchorState, Batch, Cid, CollectionKind,
    CollectionPage, CollectionSummary, DidSuffix, Iri, OrbError, WitnessProof,
};
use std::collections::{HashMap, HashSet, VecDeque};
use tokio::sync::RwLock;
use uuid::Uuid;

type Result<T> = std::result::Result<T, OrbError>;

struct Inner {
    seen_operations: HashSet<(DidSuffix, String, String)>,
    batches: HashMap<String, Batch>,
    anchors: HashMap<String, AnchorRecord>,
    tips: HashMap<DidSuffix, Cid>,
    logs: HashMap<DidSuffix, Vec<LogEntry>>,
    audit_logs: HashMap<DidSuffix, Vec<LogEntry>>,
    inbox_seen: HashSet<String>,
    outbox_activities: HashMap<String, Activity>,
    delivery_queue: VecDeque<Uuid>,
    deliveries: HashMap<Uuid, (OutboxDelivery, bool /* claimed */)>,
    parked: HashSet<Uuid>,
    collections: HashMap<(String, CollectionKind), Vec<Iri>>,
    actor_cache: HashMap<String, ActorCacheEntry>,
    accept_lists: HashMap<AcceptListName, HashSet<Iri>>,
}

/// In-memory implementation of `OrbStore`, used by the default
/// single-process configuration and by every test in this workspace.
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                seen_operations: HashSet::new(),
                batches: HashMap::new(),
                anchors: HashMap::new(),
                tips: HashMap::new(),
                logs: HashMap::new(),
                audit_logs: HashMap::new(),
                inbox_seen: HashSet::new(),
                outbox_activities: HashMap::new(),
                delivery_queue: VecDeque::new(),
                deliveries: HashMap::new(),
                parked: HashSet::new(),
                collections: HashMap::new(),
                actor_cache: HashMap::new(),
                accept_lists: HashMap::new(),
            }),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl OrbStore for MemoryStore {
    // ── Operations ──

    async fn operation_seen(
        &self,
        suffix: &DidSuffix,
        commitment: &str,
        reveal: &str,
    ) -> Result<bool> {
        let r = self.inner.read().await;
        Ok(r.seen_operations
            .contains(&(suffix.clone(), commitment.to_string(), reveal.to_string())))
    }

    async fn mark_operation_seen(
        &self,
        suffix: &DidSuffix,
        commitment: &str,
        reveal: &str,
    ) -> Result<()> {
        let mut w = self.inner.write().await;
        w.seen_operations
            .insert((suffix.clone(), commitment.to_string(), reveal.to_string()));
        Ok(())
    }

    // ── Batches ──

    async fn save_batch(&self, batch: &Batch) -> Result<()> {
        let mut w = self.inner.write().await;
        w.batches
            .insert(batch.core_index_cid.as_str().to_string(), batch.clone());
        Ok(())
    }

    async fn load_batch(&self, core_index_cid: &Cid) -> Result<Option<Batch>> {
        let r = self.inner.read().await;
        Ok(r.batches.get(core_index_cid.as_str()).cloned())
    }

    // ── Anchors ──

    async fn save_anchor(&self, record: &AnchorRecord) -> Result<()> {
        let mut w = self.inner.write().await;
        w.anchors
            .insert(record.vc_cid.as_str().to_string(), record.clone());
        Ok(())
    }

    async fn load_anchor(&self, vc_cid: &Cid) -> Result<Option<AnchorRecord>> {
        let r = self.inner.read().await;
        Ok(r.anchors.get(vc_cid.as_str()).cloned())
    }

    async fn update_anchor_state(&self, vc_cid: &Cid, state: AnchorState) -> Result<()> {
        let mut w = self.inner.write().await;
        let record = w
            .anchors
            .get_mut(vc_cid.as_str())
            .ok_or_else(|| OrbError::NotFound(format!("anchor {vc_cid} not found")))?;
        record.state = state;
        Ok(())
    }

    async fn append_witness_proof(&self, vc_cid: &Cid, proof: WitnessProof) -> Result<()> {
        let mut w = self.inner.write().await;
        let record = w
            .anchors
            .get_mut(vc_cid.as_str())
            .ok_or_else(|| OrbError::NotFound(format!("anchor {vc_cid} not found")))?;
        if record
            .proofs
            .iter()
            .any(|p| p.witness_iri == proof.witness_iri)
        {
            return Ok(());
        }
        record.proofs.push(proof);
        Ok(())
    }

    async fn mark_anchor_published(&self, vc_cid: &Cid) -> Result<()> {
        let mut w = self.inner.write().await;
        let record = w
            .anchors
            .get_mut(vc_cid.as_str())
            .ok_or_else(|| OrbError::NotFound(format!("anchor {vc_cid} not found")))?;
        record.published = true;
        Ok(())
    }

    async fn anchors_awaiting_proofs_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<AnchorRecord>> {
        let r = self.inner.read().await;
        Ok(r.anchors
            .values()
            .filter(|a| a.state == AnchorState::AwaitingProofs && a.created_at < cutoff)
            .cloned()
            .collect())
    }

    async fn list_anchors_by_state(&self, state: AnchorState) -> Result<Vec<AnchorRecord>> {
        let r = self.inner.read().await;
        Ok(r.anchors.values().filter(|a| a.state == state).cloned().collect())
    }

    // ── Didstate ──

    async fn previous_anchor_for_suffix(&self, suffix: &DidSuffix) -> Result<Option<Cid>> {
        let r = self.inner.read().await;
        Ok(r.tips.get(suffix).cloned())
    }

    async fn set_tip_for_suffix(&self, suffix: &DidSuffix, anchor_cid: Cid) -> Result<()> {
        let mut w = self.inner.write().await;
        w.tips.insert(suffix.clone(), anchor_cid);
        Ok(())
    }

    async fn append_log_entry(&self, suffix: &DidSuffix, entry: LogEntry) -> Result<()> {
        let mut w = self.inner.write().await;
        w.logs.entry(suffix.clone()).or_default().push(entry);
        Ok(())
    }

    async fn read_log(&self, suffix: &DidSuffix) -> Result<Vec<LogEntry>> {
        let r = self.inner.read().await;
        Ok(r.logs.get(suffix).cloned().unwrap_or_default())
    }

    async fn append_audit_entry(&self, suffix: &DidSuffix, entry: LogEntry) -> Result<()> {
        let mut w = self.inner.write().await;
        w.audit_logs.entry(suffix.clone()).or_default().push(entry);
        Ok(())
    }

    async fn read_audit_log(&self, suffix: &DidSuffix) -> Result<Vec<LogEntry>> {
        let r = self.inner.read().await;
        Ok(r.audit_logs.get(suffix).cloned().unwrap_or_default())
    }

    async fn known_suffixes(&self) -> Result<Vec<DidSuffix>> {
        let r = self.inner.read().await;
        Ok(r.logs.keys().cloned().collect())
    }

    // ── Activities ──

    async fn inbox_seen(&self, activity_id: &str) -> Result<bool> {
        let r = self.inner.read().await;
        Ok(r.inbox_seen.contains(activity_id))
    }

    async fn mark_inbox_seen(&self, activity_id: &str) -> Result<()> {
        let mut w = self.inner.write().await;
        w.inbox_seen.insert(activity_id.to_string());
        Ok(())
    }

    async fn save_outbox_activity(&self, activity: &Activity) -> Result<()> {
        let mut w = self.inner.write().await;
        w.outbox_activities.insert(activity.id.clone(), activity.clone());
        Ok(())
    }

    async fn load_outbox_activity(&self, activity_id: &str) -> Result<Option<Activity>> {
        let r = self.inner.read().await;
        Ok(r.outbox_activities.get(activity_id).cloned())
    }

    // ── Deliveries ──

    async fn enqueue_delivery(&self, delivery: OutboxDelivery) -> Result<()> {
        let mut w = self.inner.write().await;
        let id = delivery.delivery_id;
        w.deliveries.insert(id, (delivery, false));
        w.delivery_queue.push_back(id);
        Ok(())
    }

    async fn claim_next_delivery(&self, _claimer: &str) -> Result<Option<OutboxDelivery>> {
        let mut w = self.inner.write().await;
        while let Some(id) = w.delivery_queue.pop_front() {
            if let Some((delivery, claimed)) = w.deliveries.get_mut(&id) {
                if !*claimed {
                    *claimed = true;
                    return Ok(Some(delivery.clone()));
                }
            }
        }
        Ok(None)
    }

    async fn mark_delivery_processed(&self, delivery_id: Uuid) -> Result<()> {
        let mut w = self.inner.write().await;
        w.deliveries.remove(&delivery_id);
        Ok(())
    }

    async fn record_delivery_failure(&self, delivery_id: Uuid, attempt_count: u32) -> Result<()> {
        let mut w = self.inner.write().await;
        if let Some((delivery, claimed)) = w.deliveries.get_mut(&delivery_id) {
            delivery.attempt_count = attempt_count;
            *claimed = false;
            w.delivery_queue.push_back(delivery_id);
        }
        Ok(())
    }

    async fn park_delivery(&self, delivery_id: Uuid, _error: &str) -> Result<()> {
        let mut w = self.inner.write().await;
        w.parked.insert(delivery_id);
        Ok(())
    }

    async fn list_parked_deliveries(&self) -> Result<Vec<OutboxDelivery>> {
        let r = self.inner.read().await;
        Ok(r.parked
            .iter()
            .filter_map(|id| r.deliveries.get(id).map(|(d, _)| d.clone()))
            .collect())
    }

    // ── Collections ──

    async fn append_collection_item(
        &self,
        owner: &str,
        kind: CollectionKind,
        iri: Iri,
    ) -> Result<()> {
        let mut w = self.inner.write().await;
        w.collections
            .entry((owner.to_string(), kind))
            .or_default()
            .push(iri);
        Ok(())
    }

    async fn collection_page(
        &self,
        owner: &str,
        kind: CollectionKind,
        page_num: usize,
        page_size: usize,
    ) -> Result<CollectionPage> {
        let r = self.inner.read().await;
        let items = r
            .collections
            .get(&(owner.to_string(), kind))
            .cloned()
            .unwrap_or_default();
        let start = page_num.saturating_mul(page_size);
        let end = (start + page_size).min(items.len());
        let page = if start >= items.len() {
            Vec::new()
        } else {
            items[start..end].to_vec()
        };
        let next_page_num = if end < items.len() {
            Some(page_num + 1)
        } else {
            None
        };
        Ok(CollectionPage {
            items: page,
            next_page_num,
        })
    }

    async fn collection_summary(
        &self,
        owner: &str,
        kind: CollectionKind,
    ) -> Result<CollectionSummary> {
        let r = self.inner.read().await;
        let total_items = r
            .collections
            .get(&(owner.to_string(), kind))
            .map(|v| v.len())
            .unwrap_or(0);
        Ok(CollectionSummary { kind, total_items })
    }

    async fn collection_contains(
        &self,
        owner: &str,
        kind: CollectionKind,
        iri: &str,
    ) -> Result<bool> {
        let r = self.inner.read().await;
        Ok(r.collections
            .get(&(owner.to_string(), kind))
            .map(|v| v.iter().any(|x| x == iri))
            .unwrap_or(false))
    }

    async fn collection_remove(&self, owner: &str, kind: CollectionKind, iri: &str) -> Result<()> {
        let mut w = self.inner.write().await;
        if let Some(v) = w.collections.get_mut(&(owner.to_string(), kind)) {
            v.retain(|x| x != iri);
        }
        Ok(())
    }

    // ── Actor cache ──

    async fn cache_actor(&self, entry: ActorCacheEntry) -> Result<()> {
        let mut w = self.inner.write().await;
        w.actor_cache.insert(entry.document.iri.clone(), entry);
        Ok(())
    }

    async fn get_cached_actor(&self, iri: &str) -> Result<Option<ActorCacheEntry>> {
        let r = self.inner.read().await;
        Ok(r.actor_cache.get(iri).cloned())
    }

    async fn evict_expired_actors(&self, now: DateTime<Utc>) -> Result<usize> {
        let mut w = self.inner.write().await;
        let before = w.actor_cache.len();
        w.actor_cache.retain(|_, entry| !entry.is_expired(now));
        Ok(before - w.actor_cache.len())
    }

    // ── Accept lists ──

    async fn accept_list_add(&self, list: AcceptListName, iri: Iri) -> Result<()> {
        let mut w = self.inner.write().await;
        w.accept_lists.entry(list).or_default().insert(iri);
        Ok(())
    }

    async fn accept_list_remove(&self, list: AcceptListName, iri: &str) -> Result<()> {
        let mut w = self.inner.write().await;
        if let Some(set) = w.accept_lists.get_mut(&list) {
            set.remove(iri);
        }
        Ok(())
    }

    async fn accept_list_contains(&self, list: AcceptListName, iri: &str) -> Result<bool> {
        let r = self.inner.read().await;
        Ok(r.accept_lists
            .get(&list)
            .map(|set| set.contains(iri))
            .unwrap_or(false))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn operation_dedup_round_trips() {
        let store = MemoryStore::new();
        let suffix = DidSuffix::new("abc");
        assert!(!store.operation_seen(&suffix, "c1", "r1").await.unwrap());
        store.mark_operation_seen(&suffix, "c1", "r1").await.unwrap();
        assert!(store.operation_seen(&suffix, "c1", "r1").await.unwrap());
    }

    #[tokio::test]
    async fn delivery_claim_is_single_consumer() {
        let store = MemoryStore::new();
        let delivery = OutboxDelivery {
            delivery_id: Uuid::new_v4(),
            activity: crate::test_support::sample_activity(),
            target_inbox: "https://peer.test/inbox".to_string(),
            attempt_count: 0,
        };
        store.enqueue_delivery(delivery.clone()).await.unwrap();
        let claimed = store.claim_next_delivery("worker-1").await.unwrap();
        assert!(claimed.is_some());
        let none = store.claim_next_delivery("worker-2").await.unwrap();
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn collection_paginates_in_insertion_order() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .append_collection_item("actor-a", CollectionKind::Followers, format!("iri-{i}"))
                .await
                .unwrap();
        }
        let page = store
            .collection_page("actor-a", CollectionKind::Followers, 0, 2)
            .await
            .unwrap();
        assert_eq!(page.items, vec!["iri-0", "iri-1"]);
        assert_eq!(page.next_page_num, Some(1));
    }
}

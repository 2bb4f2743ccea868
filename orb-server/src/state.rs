//! Shared application state: every port/backend/component wired together,
//! injected into handlers the way the teacher's `main.rs` wires
//! `CoreService` once and threads it through `Extension`.

use orb_core::activitypub::inbox::{AnchorIngest, OutboxAnnouncer, OutboxOfferDispatcher};
use orb_core::activitypub::{ActorResolver, CollectionService, Inbox, Outbox};
use orb_core::witness::WitnessPolicy;
use orb_core::{
    AnchorBuilder, BatchWriter, Config, ContentAddressableStore, InProcessBus, KmsClient, LocalCas,
    Observer, OperationQueue, OrbStore, Resolver, SoftwareKms, TaskScheduler, WitnessCollector,
};
use orb_types::{AcceptListPolicy, ActorDocument};
use std::sync::Arc;
use std::time::Duration;

pub struct AppState {
    pub config: Config,
    pub store: Arc<dyn OrbStore>,
    pub cas: Arc<dyn ContentAddressableStore>,
    pub kms: Arc<dyn KmsClient>,
    pub queue: Arc<OperationQueue>,
    pub batch_writer: Arc<BatchWriter>,
    pub anchor_builder: Arc<AnchorBuilder>,
    pub witness_collector: Arc<WitnessCollector>,
    pub resolver: Arc<Resolver>,
    pub observer: Arc<Observer>,
    pub inbox: Arc<Inbox>,
    pub outbox: Arc<Outbox>,
    pub collections: Arc<CollectionService>,
    pub actors: Arc<ActorResolver>,
    pub scheduler: Arc<TaskScheduler>,
    pub local_actor: ActorDocument,
    pub signing_key_id: String,
}

impl AppState {
    /// Wire every component together from `config`, using the in-memory
    /// store/CAS/KMS. The `postgres` feature swaps `MemoryStore` for
    /// `PostgresStore` at the call site in `main.rs`; this constructor stays
    /// backend-agnostic by taking the store as a parameter.
    pub async fn bootstrap(config: Config, store: Arc<dyn OrbStore>) -> anyhow::Result<Arc<Self>> {
        let cas: Arc<dyn ContentAddressableStore> = Arc::new(LocalCas::new());
        let kms: Arc<dyn KmsClient> = Arc::new(SoftwareKms::new());
        let http = reqwest::Client::new();

        // The signing key id doubles as the `keyId` embedded in outbound
        // HTTP-Signature headers, so it must be the actor's verification
        // method IRI (`{iri}#main-key`) — a verifier recovers the actor IRI
        // from it by splitting on '#'. It has to match what
        // `build_local_actor` derives for `public_key.id` below.
        let local_actor_iri = format!("{}/services/orb", config.external_endpoint);
        let signing_key_id = format!("{local_actor_iri}#main-key");

        let local_actor = orb_core::activitypub::build_local_actor(
            kms.as_ref(),
            &config.external_endpoint,
            "orb",
            &signing_key_id,
        )
        .await?;

        let resolver = Arc::new(Resolver::new(store.clone()));
        let bus = Arc::new(InProcessBus::new(config.mq_op_pool));
        let queue = Arc::new(OperationQueue::new(bus, resolver.clone(), config.maintenance_mode_enabled));
        let batch_writer = Arc::new(BatchWriter::new(
            queue.clone(),
            cas.clone(),
            store.clone(),
            100,
            config.batch_writer_timeout,
        ));
        let anchor_builder = Arc::new(AnchorBuilder::new(
            cas.clone(),
            kms.clone(),
            store.clone(),
            local_actor_iri.clone(),
            signing_key_id.clone(),
        ));

        // Built before the outbox so the anchoring node can be wired as one
        // of its own anchor observers (see `OutboxAnnouncer` below) — a node
        // must converge on its own anchors without waiting for a federated
        // peer to echo them back through the inbox.
        let actors = Arc::new(ActorResolver::new(store.clone(), http.clone(), Duration::from_secs(3600)));
        let observer = Arc::new(Observer::new(cas.clone(), store.clone(), actors.clone(), http.clone()));
        let anchor_ingest: Arc<dyn AnchorIngest> = observer.clone();

        // Cache this node's own actor document with a long TTL so
        // `ActorResolver::resolve` can recover it without a loopback HTTP
        // call, e.g. while verifying the witness proof on its own anchors.
        store
            .cache_actor(orb_types::ActorCacheEntry {
                document: local_actor.clone(),
                cached_at: chrono::Utc::now(),
                ttl_seconds: 315_360_000,
            })
            .await?;

        let outbox = Arc::new(Outbox::new(
            store.clone(),
            kms.clone(),
            actors.clone(),
            http.clone(),
            signing_key_id.clone(),
            5,
        ));
        let witness_collector = Arc::new(WitnessCollector::new(
            store.clone(),
            Arc::new(OutboxOfferDispatcher {
                outbox: outbox.clone(),
                local_actor_iri: local_actor_iri.clone(),
            }),
            Arc::new(OutboxAnnouncer {
                outbox: outbox.clone(),
                store: store.clone(),
                local_actor_iri: local_actor_iri.clone(),
                anchor_ingest: anchor_ingest.clone(),
            }),
            local_actor_iri.clone(),
            WitnessPolicy {
                min_percent: 100,
                log_required: false,
                role: None,
            },
        ));

        let inbox = Arc::new(Inbox::new(
            store.clone(),
            outbox.clone(),
            kms.clone(),
            witness_collector.clone(),
            anchor_ingest.clone(),
            local_actor_iri.clone(),
            signing_key_id.clone(),
            config.follow_auth_policy,
            config.invite_witness_auth_policy,
        ));

        let collections = Arc::new(CollectionService::new(store.clone(), config.collection_page_size));

        let scheduler = Arc::new(TaskScheduler::new(
            store.clone(),
            witness_collector.clone(),
            queue.clone(),
            anchor_ingest,
            http.clone(),
            local_actor_iri,
            config.witness_timeout,
            config.task_manager_check_interval,
            config.anchor_event_sync_interval,
            config.vct_monitoring_interval,
        ));

        Ok(Arc::new(Self {
            config,
            store,
            cas,
            kms,
            queue,
            batch_writer,
            anchor_builder,
            witness_collector,
            resolver,
            observer,
            inbox,
            outbox,
            collections,
            actors,
            scheduler,
            local_actor,
            signing_key_id,
        }))
    }

    pub fn accept_list_policy(&self, list: orb_core::model::AcceptListName) -> AcceptListPolicy {
        self.config.accept_list_policy(list)
    }
}

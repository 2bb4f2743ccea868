//! End-to-end node scenarios over `MemoryStore`, exercising the wiring from
//! `AppState::bootstrap` through the background pipeline rather than any one
//! component in isolation. Named after spec.md §8's literal S1-S6 scenarios.

use orb_core::model::AcceptListName;
use orb_core::{Config, MemoryStore, OrbStore};
use orb_server::state::AppState;
use orb_types::{DidSuffix, Operation, OperationType, OrbError, ResolutionStatus};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

async fn bootstrap() -> Arc<AppState> {
    let store: Arc<dyn OrbStore> = Arc::new(MemoryStore::new());
    AppState::bootstrap(Config::for_tests(), store)
        .await
        .expect("bootstrap should not fail with an in-memory store")
}

fn create_op(suffix: &str) -> Operation {
    Operation {
        op_type: OperationType::Create,
        did_suffix: DidSuffix::new(suffix),
        delta_commitment: "commit-1".to_string(),
        reveal_value: String::new(),
        signed_data: "genesis-key".to_string(),
        anchor_origin: "https://node.test".to_string(),
    }
}

fn update_op(suffix: &str, reveal: &str) -> Operation {
    Operation {
        op_type: OperationType::Update,
        did_suffix: DidSuffix::new(suffix),
        delta_commitment: "commit-2".to_string(),
        reveal_value: reveal.to_string(),
        signed_data: "updated-key".to_string(),
        anchor_origin: "https://node.test".to_string(),
    }
}

fn deactivate_op(suffix: &str, reveal: &str) -> Operation {
    Operation {
        op_type: OperationType::Deactivate,
        did_suffix: DidSuffix::new(suffix),
        delta_commitment: String::new(),
        reveal_value: reveal.to_string(),
        signed_data: "deactivate-key".to_string(),
        anchor_origin: "https://node.test".to_string(),
    }
}

fn recover_op(suffix: &str, reveal: &str) -> Operation {
    Operation {
        op_type: OperationType::Recover,
        did_suffix: DidSuffix::new(suffix),
        delta_commitment: "commit-3".to_string(),
        reveal_value: reveal.to_string(),
        signed_data: "recovered-key".to_string(),
        anchor_origin: "https://node.test".to_string(),
    }
}

/// S1: submitting a `create` eventually makes the DID resolvable as
/// `Published`, once the background pipeline has cut a batch and built an
/// anchor for it.
#[tokio::test]
async fn s1_create_then_resolve_converges_to_published() {
    let state = bootstrap().await;
    let _handles = orb_server::pipeline::spawn(state.clone());

    state.queue.publish(create_op("alice")).await.unwrap();

    let view = wait_for_status(&state, "alice", ResolutionStatus::Published).await;
    assert_eq!(view.document.public_keys, vec!["genesis-key".to_string()]);
    assert!(view.metadata.canonical_id.is_some());
}

/// S2: immediately after submit (before any batch has even been cut), the
/// interim resolve endpoint returns 200 with a document synthesized
/// directly from the submitted `initialState`, and no `canonicalId`.
#[tokio::test]
async fn s2_interim_resolve_has_no_canonical_id() {
    let state = bootstrap().await;
    // Deliberately do not spawn the pipeline: nothing drains the queue, so
    // this is genuinely "immediately after submit".
    state.queue.publish(create_op("bob")).await.unwrap();

    let view = state
        .resolver
        .resolve_interim(&DidSuffix::new("bob"), "genesis-key")
        .await
        .unwrap();
    assert_eq!(view.metadata.status, ResolutionStatus::Interim);
    assert!(view.metadata.canonical_id.is_none());
    assert_eq!(view.document.public_keys, vec!["genesis-key".to_string()]);
}

/// S3: a create followed by an update that reveals the create's
/// commitment folds into a two-entry document once both have anchored, and
/// the update's anchor CID shows up in `previousOperations`.
#[tokio::test]
async fn s3_update_applies_and_extends_previous_operations() {
    let state = bootstrap().await;
    let _handles = orb_server::pipeline::spawn(state.clone());

    state.queue.publish(create_op("carol")).await.unwrap();
    let created = wait_for_status(&state, "carol", ResolutionStatus::Published).await;
    assert_eq!(created.metadata.previous_operations.len(), 1);

    state
        .queue
        .publish(update_op("carol", "commit-1"))
        .await
        .unwrap();

    let view = wait_for(&state, "carol", |v| v.document.public_keys.len() == 2).await;
    assert_eq!(
        view.document.public_keys,
        vec!["genesis-key".to_string(), "updated-key".to_string()]
    );
    assert_eq!(view.metadata.previous_operations.len(), 2);
}

/// S4: submit `deactivate`, wait for publication, then submit `recover` —
/// admission itself is rejected with a validation error, not silently
/// folded into the log as a skipped entry.
#[tokio::test]
async fn s4_recover_after_deactivate_is_rejected_at_admission() {
    let state = bootstrap().await;
    let _handles = orb_server::pipeline::spawn(state.clone());

    state.queue.publish(create_op("dave")).await.unwrap();
    wait_for_status(&state, "dave", ResolutionStatus::Published).await;

    state
        .queue
        .publish(deactivate_op("dave", "commit-1"))
        .await
        .unwrap();
    wait_for_status(&state, "dave", ResolutionStatus::Deactivated).await;

    let err = state
        .queue
        .publish(recover_op("dave", "ignored"))
        .await
        .unwrap_err();
    assert!(matches!(err, OrbError::Validation(_)));
    assert!((400..500).contains(&err.http_status()));
}

/// S5: a witness policy requiring the sole configured witness that never
/// responds expires the anchor instead of completing it — the resolver
/// never sees the suffix, and no `Create(anchor)` is ever posted to the
/// outbox (the only code path that posts one is
/// `OutboxAnnouncer::announce_completed`, reached only from `Completed`).
#[tokio::test]
async fn s5_witness_expiry_leaves_the_suffix_unresolvable() {
    let state = bootstrap().await;
    let _handles = orb_server::pipeline::spawn(state.clone());

    state
        .store
        .append_collection_item(
            &state.local_actor.iri,
            orb_types::CollectionKind::Witnesses,
            "https://witness.test/services/w".to_string(),
        )
        .await
        .unwrap();

    state.queue.publish(create_op("erin")).await.unwrap();

    // Wait for the anchor to reach AwaitingProofs (batch cut + anchor build
    // has run) before letting the witness timeout elapse.
    tokio::time::sleep(Duration::from_millis(150)).await;
    tokio::time::sleep(state.config.witness_timeout + Duration::from_millis(100)).await;
    state.scheduler.witness_expiry_once().await.unwrap();

    let suffix = DidSuffix::new("erin");
    let err = state.resolver.resolve(&suffix).await.unwrap_err();
    assert!(matches!(err, OrbError::NotFound(_)));

    let outbox_summary = state
        .store
        .collection_summary(&state.local_actor.iri, orb_types::CollectionKind::Outbox)
        .await
        .unwrap();
    assert_eq!(outbox_summary.total_items, 0);
}

/// S6: node B follows A and is accepted; A creates and publishes 3 anchors
/// while B never dispatches the deliveries queued for it (simulating
/// offline); B's anchor-sync task then backfills all 3 from A's outbox and
/// B resolves the corresponding DIDs. Run over real bound sockets and real
/// signed HTTP so the federation wiring — actor resolution, HTTP-Signature
/// verification, and the backfill endpoints — is exercised for real rather
/// than stubbed.
#[tokio::test]
async fn s6_federation_replay_backfills_while_peer_is_offline() {
    let (state_a, _addr_a) = spawn_node().await;
    let (state_b, _addr_b) = spawn_node().await;

    // A pre-authorizes B's follow request.
    state_a
        .store
        .accept_list_add(AcceptListName::Follow, state_b.local_actor.iri.clone())
        .await
        .unwrap();

    // B -> A: Follow, dispatched deterministically (not the background loop).
    state_b.inbox.send_follow(state_a.local_actor.iri.clone()).await.unwrap();
    assert!(state_b.outbox.dispatch_once("test").await.unwrap());

    // A handles the Follow inline (signed HTTP POST already landed by the
    // time dispatch_once's request returned) and queues an Accept back to B.
    wait_for_collection_contains(&state_a, orb_types::CollectionKind::Followers, &state_b.local_actor.iri).await;
    assert!(state_a.outbox.dispatch_once("test").await.unwrap());

    // B handles the Accept inline, growing its Following collection.
    wait_for_collection_contains(&state_b, orb_types::CollectionKind::Following, &state_a.local_actor.iri).await;

    // A creates 3 DIDs. Its own pipeline runs, so each converges locally to
    // Published; the Create activities queued for B sit undelivered since
    // nothing calls `state_a.outbox.dispatch_once` for them.
    let _handles_a = orb_server::pipeline::spawn(state_a.clone());
    for suffix in ["s6-one", "s6-two", "s6-three"] {
        state_a.queue.publish(create_op(suffix)).await.unwrap();
    }
    for suffix in ["s6-one", "s6-two", "s6-three"] {
        wait_for_status(&state_a, suffix, ResolutionStatus::Published).await;
    }

    for suffix in ["s6-one", "s6-two", "s6-three"] {
        assert!(state_b.resolver.resolve(&DidSuffix::new(suffix)).await.is_err());
    }

    // "B restarts": it runs its anchor-sync backfill task, walking A's
    // outbox over real HTTP and fetching each unseen activity.
    state_b.scheduler.anchor_sync_once().await.unwrap();

    for suffix in ["s6-one", "s6-two", "s6-three"] {
        let view = wait_for(&state_b, suffix, |v| v.metadata.canonical_id.is_some()).await;
        assert_eq!(view.document.public_keys, vec!["genesis-key".to_string()]);
    }
}

/// Bind a real ephemeral-port listener, bootstrap a node whose
/// `external_endpoint` is that address, and serve its router in the
/// background so peer nodes can reach it over actual HTTP.
async fn spawn_node() -> (Arc<AppState>, SocketAddr) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut config = Config::for_tests();
    config.external_endpoint = format!("http://{addr}");
    config.host_url = addr.to_string();

    let store: Arc<dyn OrbStore> = Arc::new(MemoryStore::new());
    let state = AppState::bootstrap(config, store)
        .await
        .expect("bootstrap should not fail with an in-memory store");

    let router = orb_server::router::build(state.clone());
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (state, addr)
}

async fn wait_for_collection_contains(state: &AppState, kind: orb_types::CollectionKind, iri: &str) {
    for _ in 0..50 {
        if state
            .store
            .collection_contains(&state.local_actor.iri, kind, iri)
            .await
            .unwrap()
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("{iri} never appeared in collection {kind:?}");
}

async fn wait_for_status(
    state: &AppState,
    suffix: &str,
    status: ResolutionStatus,
) -> orb_types::DidView {
    wait_for(state, suffix, move |v| v.metadata.status == status).await
}

async fn wait_for(
    state: &AppState,
    suffix: &str,
    predicate: impl Fn(&orb_types::DidView) -> bool,
) -> orb_types::DidView {
    let suffix = DidSuffix::new(suffix);
    for _ in 0..50 {
        if let Ok(view) = state.resolver.resolve(&suffix).await {
            if predicate(&view) {
                return view;
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("condition for suffix {suffix} was not met in time");
}

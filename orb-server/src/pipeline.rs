//! Wires C1's lane consumers through C2's batch writer into C3's anchor
//! builder and C4's witness collector — the background half of a node,
//! shared by `main` and the integration tests so both exercise the exact
//! same wiring.

use crate::state::AppState;
use orb_core::queue::spawn_lane_consumers;
use std::sync::Arc;
use tracing::error;

/// Spawn the batch-cut pipeline's tasks, detached. Returns the lane
/// consumer handles so a caller (tests, mainly) can hold or drop them.
pub fn spawn(state: Arc<AppState>) -> Vec<tokio::task::JoinHandle<()>> {
    let mut handles = Vec::new();

    let queue = state.queue.clone();
    let batch_writer = state.batch_writer.clone();
    let anchor_builder = state.anchor_builder.clone();
    let witnesses = state.witness_collector.clone();
    handles.extend(spawn_lane_consumers(queue, move |delivery| {
        let batch_writer = batch_writer.clone();
        let anchor_builder = anchor_builder.clone();
        let witnesses = witnesses.clone();
        async move {
            if let Some(cut) = batch_writer.admit(delivery).await? {
                complete_batch(cut, &anchor_builder, &witnesses).await;
            }
            Ok(())
        }
    }));

    let batch_writer = state.batch_writer.clone();
    let anchor_builder = state.anchor_builder.clone();
    let witnesses = state.witness_collector.clone();
    let timeout = state.config.batch_writer_timeout;
    handles.push(tokio::spawn(async move {
        let mut ticker = tokio::time::interval(timeout);
        loop {
            ticker.tick().await;
            match batch_writer.cut_if_due().await {
                Ok(Some(cut)) => complete_batch(cut, &anchor_builder, &witnesses).await,
                Ok(None) => {}
                Err(err) => error!(%err, "periodic batch cut failed"),
            }
        }
    }));

    handles
}

async fn complete_batch(
    cut: orb_core::batch::CutBatch,
    anchor_builder: &Arc<orb_core::AnchorBuilder>,
    witnesses: &Arc<orb_core::WitnessCollector>,
) {
    let anchor_origin = cut
        .batch
        .operations
        .first()
        .map(|op| op.anchor_origin.clone())
        .unwrap_or_default();
    match anchor_builder.build(cut.batch, anchor_origin).await {
        Ok(record) => {
            if let Err(err) = witnesses.begin(record.vc_cid.clone(), record.vc.clone()).await {
                error!(%err, vc_cid = %record.vc_cid, "witness collection failed to start");
            }
        }
        Err(err) => error!(%err, "anchor build failed"),
    }
}

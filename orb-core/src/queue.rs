//! Operation Queue (C1): admits client operations onto the
//! [`crate::bus::OperationBus`] and exposes the per-lane receive loop C2
//! consumes from. Idempotency within the pending window is enforced at C2
//! (see [`crate::batch::BatchWriter::admit`]), per spec.md §4.1.
//!
//! `MAINTENANCE_MODE_ENABLED` gates `publish` only (spec.md §9's resolved
//! open question) — a node in maintenance mode still drains its bus and
//! serves reads, it just refuses new admissions.

use crate::bus::{OperationBus, SharedOperationBus};
use crate::model::Delivery;
use crate::resolver::Resolver;
use orb_types::{Operation, OperationType, OrbError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

type Result<T> = std::result::Result<T, OrbError>;

/// Front door for operation admission. One instance per node, shared by the
/// REST handler (publish side) and C2's batch-cutting actor (consume
/// side).
pub struct OperationQueue {
    bus: SharedOperationBus,
    resolver: Arc<Resolver>,
    maintenance_mode: AtomicBool,
}

impl OperationQueue {
    pub fn new(bus: SharedOperationBus, resolver: Arc<Resolver>, maintenance_mode: bool) -> Self {
        Self {
            bus,
            resolver,
            maintenance_mode: AtomicBool::new(maintenance_mode),
        }
    }

    pub fn set_maintenance_mode(&self, enabled: bool) {
        self.maintenance_mode.store(enabled, Ordering::SeqCst);
    }

    pub fn maintenance_mode(&self) -> bool {
        self.maintenance_mode.load(Ordering::SeqCst)
    }

    /// Admit `operation`. Rejects with `PolicyViolation` while in
    /// maintenance mode; rejects with `Validation` if `operation` is a
    /// `recover` against a suffix the resolver already shows as
    /// `Deactivated` (spec.md §8 S4) — deduplication itself happens later,
    /// at C2's `BatchWriter::admit`.
    pub async fn publish(&self, operation: Operation) -> Result<()> {
        if self.maintenance_mode() {
            return Err(OrbError::PolicyViolation(
                "node is in maintenance mode; operation admission is disabled".to_string(),
            ));
        }
        if operation.op_type == OperationType::Recover
            && self.resolver.is_deactivated(&operation.did_suffix).await?
        {
            return Err(OrbError::Validation(
                "document has been deactivated, no further operations are allowed".to_string(),
            ));
        }
        self.bus.publish(operation).await?;
        Ok(())
    }

    /// Receive the next delivery for `lane`, for C2's lane-assigned
    /// consumer task. Blocks until one is available.
    pub async fn receive(&self, lane: usize) -> Option<Delivery> {
        self.bus.receive(lane).await
    }

    /// Acknowledge admission into a batch.
    pub async fn ack(&self, delivery_id: Uuid) {
        self.bus.ack(delivery_id).await;
    }

    /// Redeliver after a consumer crash mid-admission.
    pub async fn nack(&self, delivery_id: Uuid) {
        self.bus.nack(delivery_id).await;
    }

    pub fn lane_count(&self) -> usize {
        self.bus.lane_count()
    }
}

/// Spawn one cooperative consumer task per lane, calling `on_delivery` for
/// each and ack/nack-ing based on its result. Mirrors the N-parallel,
/// per-lane-single-threaded shape spec.md §5 describes for C1.
pub fn spawn_lane_consumers<F, Fut>(
    queue: Arc<OperationQueue>,
    on_delivery: F,
) -> Vec<tokio::task::JoinHandle<()>>
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<()>> + Send + 'static,
{
    let on_delivery = Arc::new(on_delivery);
    (0..queue.lane_count())
        .map(|lane| {
            let queue = queue.clone();
            let on_delivery = on_delivery.clone();
            tokio::spawn(async move {
                info!(lane, "operation queue consumer started");
                loop {
                    let Some(delivery) = queue.receive(lane).await else {
                        break;
                    };
                    let delivery_id = delivery.delivery_id;
                    match on_delivery(delivery).await {
                        Ok(()) => queue.ack(delivery_id).await,
                        Err(err) => {
                            warn!(lane, %err, "delivery admission failed, nacking");
                            queue.nack(delivery_id).await;
                        }
                    }
                }
            })
        })
        .collect()
}

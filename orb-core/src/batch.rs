//! Batch Writer (C2): accumulates admitted operations and cuts a batch on
//! a size or time threshold (spec.md §4.2). Only one batch may be in
//! flight per node; the accumulator and the cut itself are both owned by
//! a single task so cutting is naturally serialised without a mutex held
//! across the CAS writes. Idempotency within the pending window is also
//! enforced here, via the store's `operation_seen`/`mark_operation_seen`
//! pair, per spec.md §4.1 ("idempotency is enforced at C2 by ...
//! deduplication").

use crate::cas::{put_json, ContentAddressableStore};
use crate::model::Delivery;
use crate::queue::OperationQueue;
use crate::store::OrbStore;
use orb_types::batch::{
    Batch, ChunkFile, CoreIndexFile, CoreOperationRef, ProvisionalIndexFile,
    ProvisionalOperationRef,
};
use orb_types::{Operation, OperationType, OrbError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{info, warn};
use uuid::Uuid;

type Result<T> = std::result::Result<T, OrbError>;

/// Handed to C3 once a cut succeeds.
pub struct CutBatch {
    pub batch: Batch,
}

struct Accumulator {
    pending: Vec<(Uuid, Operation)>,
    opened_at: Option<Instant>,
}

/// Single-threaded cooperative batch-cutting actor. `max_operations` and
/// `timeout` are the size/time thresholds of spec.md §4.2.
pub struct BatchWriter {
    queue: Arc<OperationQueue>,
    cas: Arc<dyn ContentAddressableStore>,
    store: Arc<dyn OrbStore>,
    max_operations: usize,
    timeout: Duration,
    accumulator: Mutex<Accumulator>,
}

impl BatchWriter {
    pub fn new(
        queue: Arc<OperationQueue>,
        cas: Arc<dyn ContentAddressableStore>,
        store: Arc<dyn OrbStore>,
        max_operations: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            queue,
            cas,
            store,
            max_operations: max_operations.max(1),
            timeout,
            accumulator: Mutex::new(Accumulator {
                pending: Vec::new(),
                opened_at: None,
            }),
        }
    }

    /// Admit one delivery into the accumulator, silently dropping it if
    /// this exact `(didSuffix, deltaCommitment, revealValue)` was already
    /// admitted within the pending window (spec.md §4.1) — a duplicate is
    /// acknowledged rather than nacked, since redelivery could never make
    /// it anything but a duplicate again. Returns a cut if admission
    /// crossed the size threshold; callers also poll [`Self::cut_if_due`]
    /// on a timer for the time threshold.
    pub async fn admit(&self, delivery: Delivery) -> Result<Option<CutBatch>> {
        let (suffix, commitment, reveal) = delivery.operation.dedup_key();
        if self.store.operation_seen(&suffix, &commitment, &reveal).await? {
            warn!(%suffix, "duplicate operation admission dropped");
            return Ok(None);
        }
        self.store
            .mark_operation_seen(&suffix, &commitment, &reveal)
            .await?;

        let mut acc = self.accumulator.lock().await;
        if acc.pending.is_empty() {
            acc.opened_at = Some(Instant::now());
        }
        acc.pending.push((delivery.delivery_id, delivery.operation));
        if acc.pending.len() >= self.max_operations {
            return self.cut_locked(&mut acc).await.map(Some);
        }
        Ok(None)
    }

    /// Cut now if the timeout has elapsed since the accumulator was first
    /// opened. Intended to be called from a periodic tick.
    pub async fn cut_if_due(&self) -> Result<Option<CutBatch>> {
        let mut acc = self.accumulator.lock().await;
        let due = acc
            .opened_at
            .map(|opened| opened.elapsed() >= self.timeout)
            .unwrap_or(false);
        if !due || acc.pending.is_empty() {
            return Ok(None);
        }
        self.cut_locked(&mut acc).await.map(Some)
    }

    async fn cut_locked(&self, acc: &mut Accumulator) -> Result<CutBatch> {
        let batch_ops = std::mem::take(&mut acc.pending);
        acc.opened_at = None;
        match self.write_batch(&batch_ops).await {
            Ok(cut) => {
                for (delivery_id, _) in &batch_ops {
                    self.queue.ack(*delivery_id).await;
                }
                info!(operations = cut.batch.operations.len(), core_index_cid = %cut.batch.core_index_cid, "batch cut");
                Ok(cut)
            }
            Err(err) => {
                warn!(%err, "batch cut failed, rolling back to queue");
                for (delivery_id, _) in &batch_ops {
                    self.queue.nack(*delivery_id).await;
                }
                Err(err)
            }
        }
    }

    /// Build chunk/provisional-index/core-index files and write them to CAS
    /// in that order. If any write fails, nothing has been handed to C3 and
    /// the caller rolls the operations back onto the queue.
    async fn write_batch(&self, ops: &[(Uuid, Operation)]) -> Result<CutBatch> {
        let operations: Vec<Operation> = ops.iter().map(|(_, op)| op.clone()).collect();

        let chunked_ops: Vec<&Operation> = operations
            .iter()
            .filter(|op| op.op_type == OperationType::Update)
            .collect();
        let chunk_file = ChunkFile {
            deltas: chunked_ops.iter().map(|op| op.signed_data.clone()).collect(),
        };
        let chunk_file_cid = put_json(self.cas.as_ref(), &chunk_file).await?;

        let provisional_index_cid = if chunked_ops.is_empty() {
            None
        } else {
            let provisional_index = ProvisionalIndexFile {
                chunk_file_cid: chunk_file_cid.clone(),
                provisional_operations: chunked_ops
                    .iter()
                    .map(|op| ProvisionalOperationRef {
                        did_suffix: op.did_suffix.clone(),
                        reveal_value: op.reveal_value.clone(),
                    })
                    .collect(),
            };
            Some(put_json(self.cas.as_ref(), &provisional_index).await?)
        };

        let core_operations: Vec<CoreOperationRef> = operations
            .iter()
            .filter(|op| op.op_type != OperationType::Update)
            .map(|op| CoreOperationRef {
                did_suffix: op.did_suffix.clone(),
                op_type: op.op_type,
                reveal_value: op.reveal_value.clone(),
                signed_data: op.signed_data.clone(),
            })
            .collect();
        let core_index_file = CoreIndexFile {
            provisional_index_file_cid: provisional_index_cid.clone(),
            core_operations,
        };
        let core_index_cid = put_json(self.cas.as_ref(), &core_index_file).await?;

        Ok(CutBatch {
            batch: Batch {
                chunk_file_cid,
                provisional_index_cid,
                core_index_cid,
                operations,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{InProcessBus, SharedOperationBus};
    use crate::cas::LocalCas;
    use crate::resolver::Resolver;
    use crate::store_memory::MemoryStore;
    use orb_types::DidSuffix;

    fn sample_op(suffix: &str, op_type: OperationType) -> Operation {
        Operation {
            op_type,
            did_suffix: DidSuffix::new(suffix),
            delta_commitment: "commit".to_string(),
            reveal_value: "reveal".to_string(),
            signed_data: "signed-data".to_string(),
            anchor_origin: "https://node.test".to_string(),
        }
    }

    fn make_writer(max_operations: usize) -> (Arc<OperationQueue>, BatchWriter) {
        let bus: SharedOperationBus = Arc::new(InProcessBus::new(1));
        let store: Arc<dyn OrbStore> = Arc::new(MemoryStore::new());
        let queue = Arc::new(OperationQueue::new(bus, Arc::new(Resolver::new(store.clone())), false));
        let cas: Arc<dyn ContentAddressableStore> = Arc::new(LocalCas::new());
        let writer = BatchWriter::new(queue.clone(), cas, store, max_operations, Duration::from_secs(3600));
        (queue, writer)
    }

    #[tokio::test]
    async fn size_threshold_cuts_a_batch() {
        let (_queue, writer) = make_writer(2);
        let d1 = Delivery {
            delivery_id: Uuid::new_v4(),
            operation: sample_op("s1", OperationType::Create),
        };
        let d2 = Delivery {
            delivery_id: Uuid::new_v4(),
            operation: sample_op("s2", OperationType::Create),
        };
        assert!(writer.admit(d1).await.unwrap().is_none());
        let cut = writer.admit(d2).await.unwrap();
        assert!(cut.is_some());
        assert_eq!(cut.unwrap().batch.operations.len(), 2);
    }

    #[tokio::test]
    async fn update_ops_go_through_chunk_file_create_ops_do_not() {
        let (_queue, writer) = make_writer(2);
        let d1 = Delivery {
            delivery_id: Uuid::new_v4(),
            operation: sample_op("s1", OperationType::Update),
        };
        let d2 = Delivery {
            delivery_id: Uuid::new_v4(),
            operation: sample_op("s2", OperationType::Create),
        };
        writer.admit(d1).await.unwrap();
        let cut = writer.admit(d2).await.unwrap().unwrap();
        assert!(cut.batch.provisional_index_cid.is_some());
    }

    #[tokio::test]
    async fn timeout_cuts_even_below_size_threshold() {
        let (_queue, writer) = BatchWriter::new_for_test();
        let d1 = Delivery {
            delivery_id: Uuid::new_v4(),
            operation: sample_op("s1", OperationType::Create),
        };
        writer.admit(d1).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let cut = writer.cut_if_due().await.unwrap();
        assert!(cut.is_some());
    }

    #[tokio::test]
    async fn duplicate_admission_is_dropped_not_batched() {
        let (_queue, writer) = make_writer(2);
        let op = sample_op("s1", OperationType::Create);
        let d1 = Delivery {
            delivery_id: Uuid::new_v4(),
            operation: op.clone(),
        };
        let d2 = Delivery {
            delivery_id: Uuid::new_v4(),
            operation: op,
        };
        assert!(writer.admit(d1).await.unwrap().is_none());
        assert!(writer.admit(d2).await.unwrap().is_none());
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(writer.cut_if_due().await.unwrap().is_none());
    }
}

#[cfg(test)]
impl BatchWriter {
    fn new_for_test() -> (Arc<OperationQueue>, Self) {
        use crate::bus::InProcessBus;
        use crate::cas::LocalCas;
        use crate::store_memory::MemoryStore;

        let bus: crate::bus::SharedOperationBus = Arc::new(InProcessBus::new(1));
        let store: Arc<dyn crate::store::OrbStore> = Arc::new(MemoryStore::new());
        let queue = Arc::new(OperationQueue::new(
            bus,
            Arc::new(crate::resolver::Resolver::new(store.clone())),
            false,
        ));
        let cas: Arc<dyn ContentAddressableStore> = Arc::new(LocalCas::new());
        let writer = BatchWriter::new(queue.clone(), cas, store, 1000, Duration::from_millis(10));
        (queue, writer)
    }
}

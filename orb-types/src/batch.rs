//! Sidetree 1.0-flavoured batch files: chunk, provisional index, core index,
//! and the immutable `Batch` record C2 produces from a cut. See spec.md §3
//! "Batch" and §4.2.

use crate::ids::{Cid, DidSuffix};
use crate::operation::{Operation, OperationType};
use serde::{Deserialize, Serialize};

/// The chunk file: raw delta payloads for every operation in the batch,
/// indexed by position so the provisional index can point back into it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChunkFile {
    pub deltas: Vec<String>,
}

/// The provisional index file: points at the chunk file and lists
/// `update` operations (those carrying a delta needing a chunk entry).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProvisionalIndexFile {
    pub chunk_file_cid: Cid,
    pub provisional_operations: Vec<ProvisionalOperationRef>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProvisionalOperationRef {
    pub did_suffix: DidSuffix,
    pub reveal_value: String,
}

/// The core index file: points at the provisional index and lists
/// `create`/`recover`/`deactivate` operations directly (these carry their
/// full payload inline rather than through the chunk file, per Sidetree
/// 1.0's core/provisional split).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoreIndexFile {
    pub provisional_index_file_cid: Option<Cid>,
    pub core_operations: Vec<CoreOperationRef>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CoreOperationRef {
    pub did_suffix: DidSuffix,
    pub op_type: OperationType,
    pub reveal_value: String,
    pub signed_data: String,
}

/// An immutable batch, written once by a `BatchWriter` cut. Never mutated
/// after construction — a later cut produces a new `Batch`, never edits
/// this one.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Batch {
    pub chunk_file_cid: Cid,
    pub provisional_index_cid: Option<Cid>,
    pub core_index_cid: Cid,
    pub operations: Vec<Operation>,
}

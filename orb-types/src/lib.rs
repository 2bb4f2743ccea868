//! orb-types — Level 1 foundation types for the Orb federated DID registry.
//!
//! Pure data structures (plus a couple of trivial helper methods) describing
//! the wire/storage shapes from the data model: DID suffixes and CIDs,
//! Sidetree operations and batches, anchor linksets and credentials, witness
//! proofs, ActivityPub activities/actors/collections, and the derived
//! DID-resolution view.
//!
//! This crate depends on nothing else in the workspace — `orb-core` and
//! `orb-server` both build on top of it.

pub mod actor;
pub mod activity;
pub mod anchor;
pub mod batch;
pub mod collection;
pub mod didstate;
pub mod error;
pub mod ids;
pub mod operation;

pub use actor::*;
pub use activity::*;
pub use anchor::*;
pub use batch::*;
pub use collection::*;
pub use didstate::*;
pub use error::*;
pub use ids::*;
pub use operation::*;

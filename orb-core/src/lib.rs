//! Core anchor pipeline and federation fabric for an Orb node: C1-C8,
//! behind storage, KMS, CAS, and operation-bus ports so the server crate
//! only has to pick concrete backends and wire them together.

pub mod activitypub;
pub mod anchor;
pub mod batch;
pub mod bus;
pub mod cas;
pub mod config;
pub mod kms;
pub mod model;
pub mod observer;
pub mod queue;
pub mod resolver;
pub mod scheduler;
pub mod store;
pub mod store_memory;
#[cfg(feature = "postgres")]
pub mod store_postgres;
pub mod witness;

#[cfg(test)]
pub mod test_support;

pub use anchor::AnchorBuilder;
pub use batch::BatchWriter;
pub use bus::{InProcessBus, OperationBus, SharedOperationBus};
pub use cas::{ContentAddressableStore, LocalCas};
pub use config::Config;
pub use kms::{KmsClient, SoftwareKms};
pub use observer::Observer;
pub use queue::OperationQueue;
pub use resolver::Resolver;
pub use scheduler::TaskScheduler;
pub use store::OrbStore;
pub use store_memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use store_postgres::PostgresStore;
pub use witness::WitnessCollector;

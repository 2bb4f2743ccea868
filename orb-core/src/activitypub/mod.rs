//! ActivityPub Service (C5): actor documents, signed inbox/outbox
//! delivery, and paginated collections (spec.md §4.5).

pub mod actor;
pub mod collections;
pub mod inbox;
pub mod outbox;
pub mod signature;

pub use actor::{build_local_actor, ActorResolver};
pub use collections::{CollectionPageView, CollectionService, CollectionSummaryView};
pub use inbox::{AnchorIngest, Inbox, OutboxAnnouncer, OutboxOfferDispatcher};
pub use outbox::Outbox;

//! Paginated collections (spec.md §4.5: "stable ordering ... size bounded;
//! iteration uses `first`/`next` links"). Thin layer over the store's
//! `collection_page`/`collection_summary`, adding the link shape the REST
//! surface serves.

use crate::store::OrbStore;
use orb_types::{CollectionKind, Iri, OrbError};
use std::sync::Arc;

type Result<T> = std::result::Result<T, OrbError>;

/// A fully-addressed collection page, ready to serialise as an
/// ActivityStreams `OrderedCollectionPage`.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CollectionPageView {
    pub items: Vec<Iri>,
    pub total_items: usize,
    pub next: Option<String>,
}

/// A collection summary, ready to serialise as an ActivityStreams
/// `OrderedCollection` (the non-paged root resource).
#[derive(Debug, Clone, serde::Serialize)]
pub struct CollectionSummaryView {
    pub total_items: usize,
    pub first: String,
}

pub struct CollectionService {
    store: Arc<dyn OrbStore>,
    page_size: usize,
}

impl CollectionService {
    pub fn new(store: Arc<dyn OrbStore>, page_size: usize) -> Self {
        Self { store, page_size }
    }

    pub async fn summary(
        &self,
        collection_url: &str,
        owner: &str,
        kind: CollectionKind,
    ) -> Result<CollectionSummaryView> {
        let summary = self.store.collection_summary(owner, kind).await?;
        Ok(CollectionSummaryView {
            total_items: summary.total_items,
            first: format!("{collection_url}?page=true&page-num=0"),
        })
    }

    pub async fn page(
        &self,
        collection_url: &str,
        owner: &str,
        kind: CollectionKind,
        page_num: usize,
    ) -> Result<CollectionPageView> {
        let summary = self.store.collection_summary(owner, kind).await?;
        let page = self
            .store
            .collection_page(owner, kind, page_num, self.page_size)
            .await?;
        Ok(CollectionPageView {
            items: page.items,
            total_items: summary.total_items,
            next: page
                .next_page_num
                .map(|n| format!("{collection_url}?page=true&page-num={n}")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store_memory::MemoryStore;

    #[tokio::test]
    async fn page_links_to_next_until_exhausted() {
        let store: Arc<dyn OrbStore> = Arc::new(MemoryStore::new());
        for i in 0..3 {
            store
                .append_collection_item("alice", CollectionKind::Followers, format!("f{i}"))
                .await
                .unwrap();
        }
        let service = CollectionService::new(store, 2);
        let url = "https://node.test/services/alice/followers";
        let first = service.page(url, "alice", CollectionKind::Followers, 0).await.unwrap();
        assert_eq!(first.items.len(), 2);
        assert!(first.next.is_some());
        let second = service
            .page(url, "alice", CollectionKind::Followers, 1)
            .await
            .unwrap();
        assert_eq!(second.items.len(), 1);
        assert!(second.next.is_none());
    }
}

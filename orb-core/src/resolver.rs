//! Resolver (C7): replays a DID suffix's per-suffix operation log into a
//! `DidView`, never itself authoritative over state (spec.md §4.7). Read
//! only — unbounded concurrency, no locking, copy-on-read (spec.md §5).

use crate::model::LogEntry;
use crate::store::OrbStore;
use orb_types::{
    Cid, DidDocument, DidMetadata, DidSuffix, DidView, OperationType, OrbError, ResolutionStatus,
    VersionSelector,
};
use std::sync::Arc;

type Result<T> = std::result::Result<T, OrbError>;

pub struct Resolver {
    store: Arc<dyn OrbStore>,
}

impl Resolver {
    pub fn new(store: Arc<dyn OrbStore>) -> Self {
        Self { store }
    }

    /// The "Published" view: replay the full log.
    pub async fn resolve(&self, suffix: &DidSuffix) -> Result<DidView> {
        self.resolve_to(suffix, None).await
    }

    /// The "Versioned" view: replay only the prefix up to `selector`.
    pub async fn resolve_versioned(&self, suffix: &DidSuffix, selector: VersionSelector) -> Result<DidView> {
        self.resolve_to(suffix, Some(selector)).await
    }

    /// The "Interim" view (spec.md §4.7/§8 S2): used immediately after
    /// submission, before any batch anchoring the suffix has reached the
    /// resolver's log. A suffix already present in the log defers to the
    /// normal replay, since it may already be `Published` or `Deactivated`;
    /// only a genuinely unknown suffix is synthesized directly from the
    /// client-supplied `initial_state` (the long-form `initialState` query
    /// parameter: the create operation's own signed payload), since there
    /// is nothing yet in local storage to replay.
    pub async fn resolve_interim(&self, suffix: &DidSuffix, initial_state: &str) -> Result<DidView> {
        let mut entries = self.store.read_log(suffix).await?;
        if entries.is_empty() {
            return Ok(interim_view(initial_state));
        }
        entries.sort_by(|a, b| {
            a.anchor_time
                .cmp(&b.anchor_time)
                .then_with(|| a.anchor_cid.cmp(&b.anchor_cid))
        });
        Ok(replay(suffix, entries, None))
    }

    /// True once the suffix's replayed view is `Deactivated`. Checked by
    /// C1 before admitting a `recover` (spec.md §8 S4): an unknown suffix
    /// is not deactivated.
    pub async fn is_deactivated(&self, suffix: &DidSuffix) -> Result<bool> {
        match self.resolve(suffix).await {
            Ok(view) => Ok(view.metadata.status == ResolutionStatus::Deactivated),
            Err(OrbError::NotFound(_)) => Ok(false),
            Err(err) => Err(err),
        }
    }

    async fn resolve_to(&self, suffix: &DidSuffix, stop_at: Option<VersionSelector>) -> Result<DidView> {
        let mut entries = self.store.read_log(suffix).await?;
        if entries.is_empty() {
            return Err(OrbError::NotFound(format!("unknown DID suffix {suffix}")));
        }
        entries.sort_by(|a, b| {
            a.anchor_time
                .cmp(&b.anchor_time)
                .then_with(|| a.anchor_cid.cmp(&b.anchor_cid))
        });
        Ok(replay(suffix, entries, stop_at))
    }
}

/// An interim document built directly from a client-supplied `initialState`
/// rather than replayed log entries: no anchor, no commitments, a single
/// genesis key.
fn interim_view(initial_state: &str) -> DidView {
    DidView {
        document: DidDocument {
            public_keys: vec![initial_state.to_string()],
            services: Vec::new(),
        },
        metadata: DidMetadata {
            canonical_id: None,
            equivalent_id: Vec::new(),
            status: ResolutionStatus::Interim,
            update_commitment: None,
            recovery_commitment: None,
            previous_operations: Vec::new(),
            annotations: Vec::new(),
        },
    }
}

/// Fold a time/CID-ordered log into a `DidView`. Each candidate entry is
/// accepted only if its `revealValue` matches the commitment outstanding
/// from the previous accepted entry — this is both the normal replay rule
/// and, for two entries sharing a commitment (a same-previous-anchor fork),
/// the canonical-history tie-break: the lexicographically smaller
/// `anchorCid` sorts first and consumes the commitment, so the later
/// sibling's `revealValue` no longer matches and it is skipped rather than
/// applied — dropped from the canonical document but still present in the
/// log for audit, per spec.md §4.7's fork-resolution paragraph.
fn replay(suffix: &DidSuffix, entries: Vec<LogEntry>, stop_at: Option<VersionSelector>) -> DidView {
    let mut document = DidDocument::default();
    let mut current_commitment: Option<String> = None;
    let mut canonical_id: Option<String> = None;
    let mut previous_operations = Vec::new();
    let mut annotations = Vec::new();
    let mut deactivated = false;

    for entry in entries {
        if deactivated {
            annotations.push(format!(
                "{} skipped: suffix {suffix} already deactivated",
                entry.anchor_cid
            ));
            continue;
        }

        let is_genesis = previous_operations.is_empty();
        let reveal_matches = if is_genesis {
            entry.operation.op_type == OperationType::Create
        } else {
            current_commitment.as_deref() == Some(entry.operation.reveal_value.as_str())
        };

        if !reveal_matches {
            annotations.push(format!(
                "{} skipped: reveal value did not match outstanding commitment",
                entry.anchor_cid
            ));
            continue;
        }

        document.public_keys.push(entry.operation.signed_data.clone());
        current_commitment = Some(entry.operation.delta_commitment.clone());
        if canonical_id.is_none() {
            canonical_id = Some(format!("did:orb:{}:{suffix}", entry.anchor_cid));
        }
        previous_operations.push(entry.anchor_cid.clone());

        if entry.operation.op_type == OperationType::Deactivate {
            deactivated = true;
        }

        if should_stop(&stop_at, &entry.anchor_cid, entry.anchor_time) {
            break;
        }
    }

    let status = if deactivated {
        ResolutionStatus::Deactivated
    } else if canonical_id.is_some() {
        ResolutionStatus::Published
    } else {
        ResolutionStatus::Interim
    };

    DidView {
        document,
        metadata: DidMetadata {
            canonical_id,
            equivalent_id: Vec::new(),
            status,
            update_commitment: if deactivated { None } else { current_commitment },
            recovery_commitment: None,
            previous_operations,
            annotations,
        },
    }
}

fn should_stop(stop_at: &Option<VersionSelector>, anchor_cid: &Cid, anchor_time: chrono::DateTime<chrono::Utc>) -> bool {
    match stop_at {
        Some(VersionSelector::Id(target)) => target == anchor_cid,
        Some(VersionSelector::Time(target)) => anchor_time >= *target,
        None => false,
    }
}

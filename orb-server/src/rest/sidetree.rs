//! Sidetree client surface (spec.md §6): operation submission and DID
//! resolution.

use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Extension, Path, Query};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use orb_types::{Cid, DidSuffix, OrbError, ResolutionStatus, VersionSelector};
use serde::Deserialize;
use std::sync::Arc;

/// `POST /sidetree/v1/operations`. 200 on admission; the operation itself
/// is not yet anchored, so the body is empty.
pub async fn submit_operation(
    Extension(state): Extension<Arc<AppState>>,
    Json(operation): Json<orb_types::Operation>,
) -> Result<StatusCode, AppError> {
    if !state.config.allowed_origins.is_empty()
        && !state.config.allowed_origins.contains(&operation.anchor_origin)
    {
        return Err(OrbError::Validation(format!(
            "anchor origin {} is not in ALLOWED_ORIGINS",
            operation.anchor_origin
        ))
        .into());
    }
    state.queue.publish(operation).await?;
    Ok(StatusCode::OK)
}

#[derive(Deserialize)]
pub struct ResolveQuery {
    #[serde(rename = "versionId")]
    version_id: Option<String>,
    #[serde(rename = "versionTime")]
    version_time: Option<chrono::DateTime<chrono::Utc>>,
    /// Long-form resolution (spec.md §8 S2): the create operation's own
    /// signed payload, used to synthesize an Interim view for a suffix
    /// that has not anchored yet.
    #[serde(rename = "initialState")]
    initial_state: Option<String>,
}

/// `GET /sidetree/v1/identifiers/{did}`. The suffix is the last
/// colon-separated segment of `did` in either its long form
/// (`did:orb:{anchorCid}:{suffix}`) or interim form
/// (`did:orb:{initialState}:{suffix}`).
pub async fn resolve(
    Extension(state): Extension<Arc<AppState>>,
    Path(did): Path<String>,
    Query(query): Query<ResolveQuery>,
) -> Result<Response, AppError> {
    let suffix = did
        .rsplit(':')
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| OrbError::Validation(format!("malformed DID {did}")))?;
    let suffix = DidSuffix::new(suffix);

    let view = if let Some(initial_state) = &query.initial_state {
        state.resolver.resolve_interim(&suffix, initial_state).await?
    } else {
        let selector = match (query.version_id, query.version_time) {
            (Some(id), _) => Some(VersionSelector::Id(Cid::new(id))),
            (None, Some(time)) => Some(VersionSelector::Time(time)),
            (None, None) => None,
        };
        match selector {
            Some(selector) => state.resolver.resolve_versioned(&suffix, selector).await,
            None => state.resolver.resolve(&suffix).await,
        }?
    };

    // Deactivated is a successful resolution but spec.md §6 calls for 410
    // rather than 200, so it's surfaced here rather than via `AppError`.
    let status = if view.metadata.status == ResolutionStatus::Deactivated {
        StatusCode::GONE
    } else {
        StatusCode::OK
    };
    Ok((status, Json(view)).into_response())
}

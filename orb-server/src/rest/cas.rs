//! Content-addressable storage surface (spec.md §6): raw object retrieval
//! and (non-IPFS) local submission.

use crate::error::AppError;
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Extension, Path};
use axum::http::StatusCode;
use orb_types::Cid;
use std::sync::Arc;

/// `GET /cas/{cid}` — raw bytes, content-type left to the caller to
/// interpret since the CAS is content-agnostic.
pub async fn get_object(
    Extension(state): Extension<Arc<AppState>>,
    Path(cid): Path<String>,
) -> Result<Bytes, AppError> {
    let bytes = state.cas.get(&Cid::new(cid)).await?;
    Ok(Bytes::from(bytes))
}

/// `PUT /cas` — store raw bytes, returning the canonical CID as plain text.
pub async fn put_object(
    Extension(state): Extension<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, String), AppError> {
    let cid = state.cas.put(body.to_vec()).await?;
    Ok((StatusCode::OK, cid.to_string()))
}

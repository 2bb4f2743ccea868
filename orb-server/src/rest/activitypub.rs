//! ActivityPub federation surface (spec.md §6): actor document, paginated
//! collections, signed inbox ingestion, and the admin-only outbox/acceptlist
//! endpoints.

use crate::error::AppError;
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::{Extension, Path, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use orb_core::activitypub::signature::{digest_header, parse_signature_header, verify_request};
use orb_core::model::AcceptListName;
use orb_types::{Activity, CollectionKind, OrbError};
use serde::Deserialize;
use std::sync::Arc;

pub async fn actor_document(
    Extension(state): Extension<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<orb_types::ActorDocument>, AppError> {
    expect_local_service(&state, &name)?;
    Ok(Json(state.local_actor.clone()))
}

/// `GET /services/{name}/activities/{id}`. Serves a locally-originated
/// activity back to a peer backfilling through
/// `TaskScheduler::anchor_sync_once`.
pub async fn activity_document(
    Extension(state): Extension<Arc<AppState>>,
    Path((name, id)): Path<(String, String)>,
) -> Result<Json<Activity>, AppError> {
    expect_local_service(&state, &name)?;
    let activity_id = format!("{}/activities/{id}", state.local_actor.iri);
    state
        .store
        .load_outbox_activity(&activity_id)
        .await?
        .map(Json)
        .ok_or_else(|| OrbError::NotFound(format!("no activity {activity_id}")).into())
}

#[derive(Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    page: bool,
    #[serde(rename = "page-num", default)]
    page_num: usize,
}

fn parse_collection_kind(s: &str) -> Result<CollectionKind, AppError> {
    Ok(match s {
        "inbox" => CollectionKind::Inbox,
        "outbox" => CollectionKind::Outbox,
        "followers" => CollectionKind::Followers,
        "following" => CollectionKind::Following,
        "witnesses" => CollectionKind::Witnesses,
        "witnessing" => CollectionKind::Witnessing,
        "liked" => CollectionKind::Liked,
        "likes" => CollectionKind::Likes,
        "shares" => CollectionKind::Shares,
        other => return Err(OrbError::Validation(format!("unknown collection {other}")).into()),
    })
}

pub async fn collection(
    Extension(state): Extension<Arc<AppState>>,
    Path((name, collection)): Path<(String, String)>,
    Query(query): Query<PageQuery>,
) -> Result<Response, AppError> {
    expect_local_service(&state, &name)?;
    let kind = parse_collection_kind(&collection)?;
    let owner = state.local_actor.iri.clone();
    let url = format!("{owner}/{collection}");

    if query.page {
        let page = state.collections.page(&url, &owner, kind, query.page_num).await?;
        Ok(Json(page).into_response())
    } else {
        let summary = state.collections.summary(&url, &owner, kind).await?;
        Ok(Json(summary).into_response())
    }
}

/// `POST /services/{name}/inbox`. HTTP-Signature verified over
/// `(request-target) date digest` when `HTTP_SIGNATURES_ENABLED` (spec.md
/// §6/§8 property 6) before the activity is ever handed to `Inbox::handle`.
pub async fn post_inbox(
    Extension(state): Extension<Arc<AppState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, AppError> {
    expect_local_service(&state, &name)?;

    if state.config.http_signatures_enabled {
        verify_signed_request(&state, "POST", &format!("/services/{name}/inbox"), &headers, &body).await?;
    }

    let activity: Activity =
        serde_json::from_slice(&body).map_err(|e| OrbError::Validation(format!("malformed activity: {e}")))?;
    state.inbox.handle(activity).await?;
    Ok(StatusCode::OK)
}

fn required_header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, AppError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| OrbError::Auth(format!("missing {name} header")).into())
}

async fn verify_signed_request(
    state: &AppState,
    method: &str,
    path: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<(), AppError> {
    let date = required_header(headers, "date")?;
    let digest = required_header(headers, "digest")?;
    let signature_header = required_header(headers, "signature")?;

    let expected_digest = digest_header(body);
    if digest != expected_digest {
        return Err(OrbError::Auth("Digest header does not match body".to_string()).into());
    }

    let parsed = parse_signature_header(signature_header)?;
    let actor_iri = parsed.key_id.split('#').next().unwrap_or(&parsed.key_id).to_string();
    let actor = state.actors.resolve(&actor_iri).await?;

    let ok = verify_request(
        &actor.public_key.public_key_multibase,
        method,
        path,
        date,
        digest,
        &parsed.signature,
    )?;
    if !ok {
        return Err(OrbError::Auth("HTTP signature verification failed".to_string()).into());
    }
    Ok(())
}

/// `POST /services/{name}/outbox`. Admin-authenticated local activity
/// submission — delivered through the same `Outbox::post` path federation
/// replies use.
pub async fn post_outbox(
    Extension(state): Extension<Arc<AppState>>,
    Path(name): Path<String>,
    Json(activity): Json<Activity>,
) -> Result<StatusCode, AppError> {
    expect_local_service(&state, &name)?;
    state.outbox.post(activity).await?;
    Ok(StatusCode::ACCEPTED)
}

#[derive(Deserialize)]
pub struct AcceptListTypeQuery {
    #[serde(rename = "type")]
    list: AcceptListNameWire,
}

#[derive(Deserialize, Clone, Copy)]
#[serde(rename_all = "lowercase")]
pub enum AcceptListNameWire {
    Follow,
    Witness,
}

#[derive(Deserialize, Default)]
pub struct AcceptListMutation {
    #[serde(default)]
    add: Vec<String>,
    #[serde(default)]
    remove: Vec<String>,
}

/// `POST /services/{name}/acceptlist?type=follow|witness`. Admin-authenticated;
/// batch add/remove of IRIs on the named accept-list.
pub async fn post_acceptlist(
    Extension(state): Extension<Arc<AppState>>,
    Path(name): Path<String>,
    Query(query): Query<AcceptListTypeQuery>,
    Json(mutation): Json<AcceptListMutation>,
) -> Result<StatusCode, AppError> {
    expect_local_service(&state, &name)?;
    let list = match query.list {
        AcceptListNameWire::Follow => AcceptListName::Follow,
        AcceptListNameWire::Witness => AcceptListName::Witness,
    };
    for iri in mutation.add {
        state.store.accept_list_add(list, iri).await?;
    }
    for iri in &mutation.remove {
        state.store.accept_list_remove(list, iri).await?;
    }
    Ok(StatusCode::OK)
}

fn expect_local_service(state: &AppState, name: &str) -> Result<(), AppError> {
    if state.local_actor.iri.ends_with(&format!("/services/{name}")) {
        Ok(())
    } else {
        Err(OrbError::NotFound(format!("no local service named {name}")).into())
    }
}

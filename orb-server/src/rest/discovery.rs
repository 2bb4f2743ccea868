//! Discovery endpoints (spec.md §6): `.well-known` resources clients use
//! to find the Sidetree endpoints and to resolve a handle to an actor.

use crate::error::AppError;
use crate::state::AppState;
use axum::extract::{Extension, Query};
use axum::Json;
use orb_types::OrbError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Serialize)]
pub struct DidOrbDiscovery {
    resolution_endpoint: String,
    operation_endpoint: String,
}

pub async fn did_orb(Extension(state): Extension<Arc<AppState>>) -> Json<DidOrbDiscovery> {
    let base = &state.config.external_endpoint;
    Json(DidOrbDiscovery {
        resolution_endpoint: format!("{base}/sidetree/v1/identifiers"),
        operation_endpoint: format!("{base}/sidetree/v1/operations"),
    })
}

#[derive(Deserialize)]
pub struct WebfingerQuery {
    resource: String,
}

#[derive(Serialize)]
pub struct JrdLink {
    rel: String,
    #[serde(rename = "type")]
    content_type: String,
    href: String,
}

#[derive(Serialize)]
pub struct Jrd {
    subject: String,
    links: Vec<JrdLink>,
}

/// `GET /.well-known/webfinger?resource=acct:{name}@{host}` or
/// `resource={actorIri}` — either form resolves to the local actor's IRI.
pub async fn webfinger(
    Extension(state): Extension<Arc<AppState>>,
    Query(query): Query<WebfingerQuery>,
) -> Result<Json<Jrd>, AppError> {
    let name = query
        .resource
        .rsplit(['@', ':', '/'])
        .next()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| OrbError::Validation(format!("malformed resource {}", query.resource)))?;

    if !state.local_actor.iri.ends_with(&format!("/services/{name}")) {
        return Err(OrbError::NotFound(format!("no local service matching {}", query.resource)).into());
    }

    Ok(Json(Jrd {
        subject: query.resource,
        links: vec![JrdLink {
            rel: "self".to_string(),
            content_type: "application/activity+json".to_string(),
            href: state.local_actor.iri.clone(),
        }],
    }))
}

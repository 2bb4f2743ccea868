//! Route assembly. Mirrors the teacher's protected/public split — admin
//! routes carry the bearer-token layer, everything else is open (signed
//! inbox POSTs verify their own signature inline, per spec.md §6).

use crate::middleware::auth::admin_auth;
use crate::rest::{activitypub, cas, discovery, sidetree};
use crate::state::AppState;
use axum::routing::{get, post, put};
use axum::{middleware, Extension, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub fn build(state: Arc<AppState>) -> Router {
    let admin = Router::new()
        .route("/services/:name/outbox", post(activitypub::post_outbox))
        .route("/services/:name/acceptlist", post(activitypub::post_acceptlist))
        .layer(middleware::from_fn(admin_auth));

    let public = Router::new()
        .route("/sidetree/v1/operations", post(sidetree::submit_operation))
        .route("/sidetree/v1/identifiers/:did", get(sidetree::resolve))
        .route("/services/:name", get(activitypub::actor_document))
        .route("/services/:name/:collection", get(activitypub::collection))
        .route("/services/:name/activities/:id", get(activitypub::activity_document))
        .route("/services/:name/inbox", post(activitypub::post_inbox))
        .route("/.well-known/did-orb", get(discovery::did_orb))
        .route("/.well-known/webfinger", get(discovery::webfinger))
        .route("/cas", put(cas::put_object))
        .route("/cas/:cid", get(cas::get_object));

    admin
        .merge(public)
        .layer(Extension(state))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

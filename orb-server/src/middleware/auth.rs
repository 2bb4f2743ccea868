//! Bearer-token auth for the admin surface (`POST /services/{name}/outbox`,
//! `POST /services/{name}/acceptlist`), grounded in the teacher's JWT
//! middleware shape but checking `ORB_AUTH_TOKENS_DEF`'s static token map
//! instead of a signed JWT — spec.md §6 has no JWT concept, only bearer
//! tokens and HTTP Signatures.

use crate::state::AppState;
use axum::extract::{Extension, Request};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::Response;
use std::sync::Arc;

pub async fn admin_auth(
    Extension(state): Extension<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    let token = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match token.and_then(|t| state.config.auth_tokens.get(t)) {
        Some(_principal) => Ok(next.run(request).await),
        None => Err(StatusCode::UNAUTHORIZED),
    }
}

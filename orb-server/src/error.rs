//! Maps `OrbError` to HTTP status codes and JSON error bodies, the way
//! spec.md §7 pairs each error kind with a status.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use orb_types::OrbError;
use serde_json::json;

pub struct AppError(OrbError);

impl From<OrbError> for AppError {
    fn from(e: OrbError) -> Self {
        Self(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = json!({
            "error": self.0.to_string(),
            "code": status.as_u16(),
        });
        (status, Json(body)).into_response()
    }
}

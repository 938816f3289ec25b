use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub fn error_response(status: StatusCode, message: String) -> Response {
    (status, Json(json!({ "detail": { "message": message } }))).into_response()
}

pub fn error_response_with_code(status: StatusCode, code: &str, message: String) -> Response {
    (
        status,
        Json(json!({ "detail": { "code": code, "message": message } })),
    )
        .into_response()
}

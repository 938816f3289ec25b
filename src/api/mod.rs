mod chat;
mod errors;

use crate::state::AppState;
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;

pub use errors::error_response;

pub fn build_router() -> Router<Arc<AppState>> {
    Router::new()
        .merge(chat::router())
        .route("/healthz", get(health))
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

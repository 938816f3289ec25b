// 会话接口：SSE 流式输出与工具目录查询。
use crate::api::errors::error_response_with_code;
use crate::orchestrator::OrchestratorError;
use crate::schemas::ChatRequest;
use crate::state::AppState;
use crate::tools::DEFAULT_NAMESPACE;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_stream::StreamExt;

const DONE_SENTINEL: &str = "[DONE]";

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/astra/assistant/chat", post(chat))
        .route("/astra/assistant/tools", get(list_tools))
}

async fn chat(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ChatRequest>,
) -> Result<Response, Response> {
    let stream = state
        .orchestrator
        .stream(payload)
        .map_err(map_orchestrator_error)?;
    let mapped = stream.map(|event| {
        let frame = match event.to_payload() {
            Some(payload) => Event::default().data(payload.to_string()),
            None => Event::default().data(DONE_SENTINEL),
        };
        Ok::<Event, std::convert::Infallible>(frame)
    });
    let sse = Sse::new(mapped).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)));
    Ok(sse.into_response())
}

async fn list_tools(State(state): State<Arc<AppState>>) -> Json<Value> {
    let tools: Vec<Value> = state
        .registry
        .list_tools(DEFAULT_NAMESPACE)
        .iter()
        .map(|tool| serde_json::to_value(&tool.spec).unwrap_or(Value::Null))
        .collect();
    Json(json!({
        "data": {
            "namespaces": state.registry.list_namespaces(),
            "tools": tools,
        }
    }))
}

fn map_orchestrator_error(err: OrchestratorError) -> Response {
    error_response_with_code(StatusCode::BAD_REQUEST, err.code(), err.message().to_string())
}

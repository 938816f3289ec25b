// 调度引擎：单轮会话的模型调用、工具执行与 SSE 事件流。
use crate::config::LlmConfig;
use crate::llm::{DeltaSink, ModelProvider, ModelTurn};
use crate::prompting::build_system_prompt;
use crate::schemas::{ChatMessage, ChatRequest, StreamEvent, TokenUsage, ToolSpec};
use crate::tools::{
    execute_tool, validate_args, RegisteredTool, ToolOutcome, ToolRegistry, CHART_PAYLOAD_FIELD,
    CHART_TOOL, DEFAULT_NAMESPACE,
};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Local;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};
use uuid::Uuid;

pub mod constants;

mod chunk;
mod emitter;
mod error;
mod turn;

use chunk::ChunkHandler;
use constants::{DEFAULT_LLM_TIMEOUT_S, MAX_TOOL_ROUNDS, STREAM_EVENT_QUEUE_SIZE};
use emitter::EventEmitter;
pub use error::OrchestratorError;

#[derive(Clone)]
pub struct Orchestrator {
    registry: Arc<ToolRegistry>,
    providers: Arc<dyn ModelProvider>,
    llm: LlmConfig,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<ToolRegistry>,
        providers: Arc<dyn ModelProvider>,
        llm: LlmConfig,
    ) -> Self {
        Self {
            registry,
            providers,
            llm,
        }
    }

    /// 校验请求后在独立任务里执行本轮，返回出站事件流。
    /// 无论成败，流都以恰好一个 Done 哨兵收尾。
    pub fn stream(
        &self,
        request: ChatRequest,
    ) -> Result<ReceiverStream<StreamEvent>, OrchestratorError> {
        if request.provider.trim().is_empty() || request.model.trim().is_empty() {
            return Err(OrchestratorError::invalid_request(
                "provider and model are required".to_string(),
            ));
        }
        if request.messages.is_empty() {
            return Err(OrchestratorError::invalid_request(
                "messages must not be empty".to_string(),
            ));
        }
        let (queue, receiver) = mpsc::channel(STREAM_EVENT_QUEUE_SIZE);
        let emitter = EventEmitter::new(queue);
        let orchestrator = self.clone();
        tokio::spawn(async move {
            let session = request.session_id.clone().unwrap_or_default();
            debug!(
                "chat turn start: provider={} model={} session={session}",
                request.provider, request.model
            );
            if let Err(err) = orchestrator.execute_turn(&request, &emitter).await {
                warn!(
                    "chat turn failed for session {session}: code={} message={}",
                    err.code(),
                    err.message()
                );
                emitter
                    .emit(StreamEvent::Error {
                        error: err.message().to_string(),
                    })
                    .await;
            }
            emitter.finish().await;
        });
        Ok(ReceiverStream::new(receiver))
    }
}

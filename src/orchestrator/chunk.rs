use super::*;

/// 单轮会话的流式状态机。每个请求新建一份，严禁跨请求复用：
/// 思考指示标记、轮次计数与兜底文本都只在本轮内有效。
pub(super) struct ChunkHandler {
    thinking_shown: bool,
    tool_rounds: usize,
    fallback: Option<String>,
}

impl ChunkHandler {
    pub(super) fn new() -> Self {
        Self {
            thinking_shown: false,
            tool_rounds: 0,
            fallback: None,
        }
    }

    pub(super) fn tool_rounds(&self) -> usize {
        self.tool_rounds
    }

    /// 每个工具轮次只展示一次思考指示，第二轮起带步骤序号。
    pub(super) async fn on_reasoning_delta(&mut self, emitter: &EventEmitter) {
        if self.thinking_shown {
            return;
        }
        self.thinking_shown = true;
        let content = if self.tool_rounds == 0 {
            "Working on it...".to_string()
        } else {
            format!("Step {}: working...", self.tool_rounds + 1)
        };
        emitter.emit(StreamEvent::Thinking { content }).await;
    }

    pub(super) async fn on_tool_call(
        &mut self,
        emitter: &EventEmitter,
        tool: &str,
        tool_call_id: &str,
        args: &Value,
    ) {
        self.thinking_shown = false;
        self.tool_rounds += 1;
        let args = serde_json::to_string(args).unwrap_or_else(|_| "{}".to_string());
        emitter
            .emit(StreamEvent::ToolUse {
                tool: tool.to_string(),
                tool_call_id: tool_call_id.to_string(),
                args,
            })
            .await;
    }

    /// 图表负载严格先于工具结果下发，客户端先渲染再确认完成。
    pub(super) async fn on_tool_result(
        &mut self,
        emitter: &EventEmitter,
        tool: &str,
        tool_call_id: &str,
        outcome: &ToolOutcome,
        chart: Option<Value>,
    ) {
        if let Some(chart) = chart {
            let content = serde_json::to_string(&chart).unwrap_or_else(|_| "{}".to_string());
            emitter.emit(StreamEvent::Chart { content }).await;
        }
        emitter
            .emit(StreamEvent::ToolResult {
                tool: tool.to_string(),
                tool_call_id: tool_call_id.to_string(),
                result: outcome.to_result_value(),
            })
            .await;
        // 首个结果胜出，后续结果不覆盖兜底文本。
        if self.fallback.is_none() {
            self.fallback = Some(derive_fallback(tool, outcome));
        }
    }

    pub(super) fn take_fallback(&mut self) -> Option<String> {
        self.fallback.take()
    }
}

fn derive_fallback(tool: &str, outcome: &ToolOutcome) -> String {
    if outcome.ok {
        if let Some(summary) = outcome.data.get("summary").and_then(Value::as_str) {
            let cleaned = summary.trim();
            if !cleaned.is_empty() {
                return cleaned.to_string();
            }
        }
        format!("The {tool} tool finished successfully.")
    } else {
        let error = outcome.error.trim();
        if error.is_empty() {
            format!("The {tool} tool failed with an unknown error.")
        } else {
            format!("The {tool} tool failed: {error}")
        }
    }
}

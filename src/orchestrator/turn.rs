use super::*;

/// 把模型回调里的增量翻译成客户端事件。返回 Err 即要求模型层中断
/// 本次请求（客户端已断开，没有继续生成的意义）。
struct TurnDeltaSink<'a> {
    emitter: &'a EventEmitter,
    handler: &'a mut ChunkHandler,
    produced_text: &'a mut bool,
}

#[async_trait]
impl DeltaSink for TurnDeltaSink<'_> {
    async fn on_delta(&mut self, content: &str, reasoning: &str) -> Result<()> {
        if self.emitter.is_closed() {
            return Err(anyhow!("client disconnected"));
        }
        if !reasoning.is_empty() {
            self.handler.on_reasoning_delta(self.emitter).await;
        }
        if !content.is_empty() {
            if content.chars().any(|ch| !ch.is_whitespace()) {
                *self.produced_text = true;
            }
            self.emitter
                .emit(StreamEvent::Content {
                    content: content.to_string(),
                })
                .await;
        }
        Ok(())
    }
}

impl Orchestrator {
    pub(super) async fn execute_turn(
        &self,
        request: &ChatRequest,
        emitter: &EventEmitter,
    ) -> Result<(), OrchestratorError> {
        let model = self
            .providers
            .get_model(&request.provider, &request.model)
            .map_err(|err| OrchestratorError::model_unavailable(err.to_string()))?;

        // 工具目录每轮现取，提示词里的指引和实际可调用工具保持一致。
        let bindings = self.registry.list_tools(DEFAULT_NAMESPACE);
        let specs: Vec<ToolSpec> = bindings.iter().map(|tool| tool.spec.clone()).collect();
        let tool_payloads = build_tool_payloads(&specs);
        let today = Local::now().format("%Y-%m-%d").to_string();
        let system_prompt =
            build_system_prompt(&specs, request.user_name.as_deref(), Some(&today));

        let mut messages = Vec::with_capacity(request.messages.len() + 1);
        messages.push(ChatMessage::text("system", system_prompt));
        messages.extend(request.messages.iter().cloned());

        let mut handler = ChunkHandler::new();
        let mut produced_text = false;
        let mut usage = TokenUsage::default();
        let timeout = Duration::from_secs(
            self.llm
                .timeout_s
                .unwrap_or(DEFAULT_LLM_TIMEOUT_S)
                .max(1),
        );
        let tools = if tool_payloads.is_empty() {
            None
        } else {
            Some(tool_payloads.as_slice())
        };

        'turn: loop {
            if emitter.is_closed() {
                return Ok(());
            }
            let result = {
                let mut sink = TurnDeltaSink {
                    emitter,
                    handler: &mut handler,
                    produced_text: &mut produced_text,
                };
                tokio::time::timeout(timeout, model.stream_chat(&messages, tools, &mut sink))
                    .await
            };
            if emitter.is_closed() {
                // 客户端中途断开：释放模型调用，不再写任何事件。
                return Ok(());
            }
            let turn = result
                .map_err(|_| OrchestratorError::internal("model stream timed out".to_string()))?
                .map_err(|err| {
                    OrchestratorError::internal(format!("model call failed: {err}"))
                })?;
            if let Some(turn_usage) = turn.usage.as_ref() {
                accumulate_usage(&mut usage, turn_usage);
            }
            if turn.content.chars().any(|ch| !ch.is_whitespace()) {
                produced_text = true;
            }

            if turn.tool_calls.is_empty() {
                break;
            }

            messages.push(assistant_tool_call_message(&turn));
            for call in &turn.tool_calls {
                if handler.tool_rounds() >= MAX_TOOL_ROUNDS {
                    debug!(
                        "tool round budget exhausted, dropping pending call {}",
                        call.name
                    );
                    break 'turn;
                }
                let tool_call_id = call
                    .id
                    .clone()
                    .filter(|id| !id.trim().is_empty())
                    .unwrap_or_else(|| format!("call_{}", Uuid::new_v4().simple()));
                let raw_args = parse_arguments(&call.arguments);
                handler
                    .on_tool_call(emitter, &call.name, &tool_call_id, &raw_args)
                    .await;
                let mut outcome = self.run_tool(&bindings, &call.name, &raw_args).await;
                if emitter.is_closed() {
                    // 已开始的工具允许跑完，但结果直接丢弃。
                    return Ok(());
                }
                let chart = detach_chart_payload(&call.name, &mut outcome);
                handler
                    .on_tool_result(emitter, &call.name, &tool_call_id, &outcome, chart)
                    .await;
                messages.push(tool_result_message(&call.name, &tool_call_id, &outcome));
            }
        }

        if !produced_text {
            if let Some(fallback) = handler.take_fallback() {
                emitter
                    .emit(StreamEvent::Content { content: fallback })
                    .await;
            }
        }
        if usage.total > 0 || usage.input > 0 || usage.output > 0 {
            debug!(
                "turn token usage: input={} output={} total={}",
                usage.input, usage.output, usage.total
            );
        }
        Ok(())
    }

    /// 未注册的工具名收口为失败结果，不打断本轮。
    async fn run_tool(
        &self,
        bindings: &[RegisteredTool],
        name: &str,
        raw_args: &Value,
    ) -> ToolOutcome {
        let Some(tool) = bindings.iter().find(|tool| tool.spec.name == name) else {
            return ToolOutcome::failure(format!("unknown tool: {name}"));
        };
        let schema = match &tool.spec.input_schema {
            Value::Null => None,
            value => Some(value),
        };
        match validate_args(schema, raw_args) {
            Ok(args) => execute_tool(tool, args).await,
            Err(message) => ToolOutcome::failure(message),
        }
    }
}

fn build_tool_payloads(specs: &[ToolSpec]) -> Vec<Value> {
    specs
        .iter()
        .map(|spec| {
            let parameters = if spec.input_schema.is_null() {
                json!({ "type": "object", "properties": {} })
            } else {
                spec.input_schema.clone()
            };
            json!({
                "type": "function",
                "function": {
                    "name": spec.name,
                    "description": spec.description,
                    "parameters": parameters,
                }
            })
        })
        .collect()
}

fn parse_arguments(raw: &str) -> Value {
    let cleaned = raw.trim();
    if cleaned.is_empty() {
        return json!({});
    }
    serde_json::from_str(cleaned).unwrap_or_else(|_| json!({ "raw": cleaned }))
}

fn assistant_tool_call_message(turn: &ModelTurn) -> ChatMessage {
    let tool_calls: Vec<Value> = turn
        .tool_calls
        .iter()
        .map(|call| {
            json!({
                "id": call.id.clone().unwrap_or_default(),
                "type": "function",
                "function": { "name": call.name, "arguments": call.arguments },
            })
        })
        .collect();
    ChatMessage {
        role: "assistant".to_string(),
        content: Value::String(turn.content.clone()),
        tool_calls: Some(Value::Array(tool_calls)),
        tool_call_id: None,
    }
}

fn tool_result_message(tool: &str, tool_call_id: &str, outcome: &ToolOutcome) -> ChatMessage {
    let observation = json!({
        "tool": tool,
        "ok": outcome.ok,
        "result": outcome.to_result_value(),
    });
    ChatMessage {
        role: "tool".to_string(),
        content: Value::String(observation.to_string()),
        tool_calls: None,
        tool_call_id: Some(tool_call_id.to_string()),
    }
}

/// 适配层约定：图表工具的完整负载只发给客户端，模型只看摘要。
fn detach_chart_payload(tool: &str, outcome: &mut ToolOutcome) -> Option<Value> {
    if tool != CHART_TOOL || !outcome.ok {
        return None;
    }
    outcome.data.as_object_mut()?.remove(CHART_PAYLOAD_FIELD)
}

fn accumulate_usage(target: &mut TokenUsage, usage: &TokenUsage) {
    let total = usage.total.max(usage.input.saturating_add(usage.output));
    target.input = target.input.saturating_add(usage.input);
    target.output = target.output.saturating_add(usage.output);
    target.total = target.total.saturating_add(total);
}

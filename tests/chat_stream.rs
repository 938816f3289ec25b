use anyhow::{anyhow, Result};
use astra_server::config::LlmConfig;
use astra_server::llm::{ChatModel, DeltaSink, ModelProvider, ModelTurn, ToolCallRequest};
use astra_server::orchestrator::Orchestrator;
use astra_server::schemas::{ChatMessage, ChatRequest, StreamEvent};
use astra_server::tools::{
    register_builtin_tools, ToolRegistry, UserDirectory, CHART_TOOL, DEFAULT_NAMESPACE,
};
use async_trait::async_trait;
use futures::FutureExt;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_stream::StreamExt;

#[derive(Clone)]
struct ScriptStep {
    reasoning: String,
    deltas: Vec<String>,
    tool_calls: Vec<(Option<String>, String, String)>,
}

impl ScriptStep {
    fn text(deltas: &[&str]) -> Self {
        Self {
            reasoning: String::new(),
            deltas: deltas.iter().map(ToString::to_string).collect(),
            tool_calls: Vec::new(),
        }
    }

    fn tool_call(reasoning: &str, id: Option<&str>, name: &str, arguments: Value) -> Self {
        Self {
            reasoning: reasoning.to_string(),
            deltas: Vec::new(),
            tool_calls: vec![(
                id.map(ToString::to_string),
                name.to_string(),
                arguments.to_string(),
            )],
        }
    }

    fn silence() -> Self {
        Self {
            reasoning: String::new(),
            deltas: Vec::new(),
            tool_calls: Vec::new(),
        }
    }
}

/// 按脚本逐步应答的模型：每次调用消费一步，走到末尾后重复最后一步。
struct ScriptedModel {
    steps: Vec<ScriptStep>,
    cursor: AtomicUsize,
}

#[async_trait]
impl ChatModel for ScriptedModel {
    async fn stream_chat(
        &self,
        _messages: &[ChatMessage],
        _tools: Option<&[Value]>,
        sink: &mut dyn DeltaSink,
    ) -> Result<ModelTurn> {
        let index = self
            .cursor
            .fetch_add(1, Ordering::SeqCst)
            .min(self.steps.len().saturating_sub(1));
        let step = &self.steps[index];
        if !step.reasoning.is_empty() {
            sink.on_delta("", &step.reasoning).await?;
        }
        let mut content = String::new();
        for delta in &step.deltas {
            content.push_str(delta);
            sink.on_delta(delta, "").await?;
        }
        Ok(ModelTurn {
            content,
            reasoning: step.reasoning.clone(),
            usage: None,
            tool_calls: step
                .tool_calls
                .iter()
                .map(|(id, name, arguments)| ToolCallRequest {
                    id: id.clone(),
                    name: name.clone(),
                    arguments: arguments.clone(),
                })
                .collect(),
        })
    }
}

/// 每轮拿到一个全新的脚本模型，模拟真实供应商的无状态句柄。
struct ScriptedProvider {
    steps: Vec<ScriptStep>,
}

impl ModelProvider for ScriptedProvider {
    fn get_model(&self, provider: &str, _model: &str) -> Result<Arc<dyn ChatModel>> {
        if provider != "scripted" {
            return Err(anyhow!("unsupported provider: {provider}"));
        }
        Ok(Arc::new(ScriptedModel {
            steps: self.steps.clone(),
            cursor: AtomicUsize::new(0),
        }))
    }
}

fn default_registry() -> Arc<ToolRegistry> {
    let registry = Arc::new(ToolRegistry::new());
    register_builtin_tools(&registry, Arc::new(UserDirectory::with_seed_data()));
    registry
}

fn orchestrator_from(registry: Arc<ToolRegistry>, steps: Vec<ScriptStep>) -> Orchestrator {
    Orchestrator::new(
        registry,
        Arc::new(ScriptedProvider { steps }),
        LlmConfig::default(),
    )
}

fn request(content: &str) -> ChatRequest {
    ChatRequest {
        provider: "scripted".to_string(),
        model: "scripted-1".to_string(),
        messages: vec![ChatMessage::text("user", content)],
        session_id: None,
        user_name: None,
    }
}

async fn collect(orchestrator: &Orchestrator, request: ChatRequest) -> Vec<StreamEvent> {
    let mut stream = orchestrator.stream(request).expect("stream should start");
    let mut events = Vec::new();
    while let Some(event) = stream.next().await {
        events.push(event);
    }
    events
}

fn assert_single_done_terminal(events: &[StreamEvent]) {
    assert_eq!(events.last(), Some(&StreamEvent::Done), "missing terminal");
    let done_count = events
        .iter()
        .filter(|event| matches!(event, StreamEvent::Done))
        .count();
    assert_eq!(done_count, 1, "expected exactly one done sentinel");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn chart_turn_emits_chart_before_result() {
    let chart_args = json!({
        "chart_type": "bar",
        "title": "Signups last 7 days",
        "data": [
            { "label": "Mon", "value": 4 },
            { "label": "Tue", "value": 7 },
            { "label": "Wed", "value": 5 }
        ]
    });
    let steps = vec![
        ScriptStep::tool_call("plotting the data", Some("call_chart"), CHART_TOOL, chart_args),
        ScriptStep::text(&["Here is", " your chart."]),
    ];
    let orchestrator = orchestrator_from(default_registry(), steps);
    let events = collect(
        &orchestrator,
        request("show me a bar chart of last 7 days"),
    )
    .await;

    assert_single_done_terminal(&events);

    let tool_use_idx = events
        .iter()
        .position(|event| matches!(event, StreamEvent::ToolUse { tool, .. } if tool == CHART_TOOL))
        .expect("tool_use missing");
    let chart_idx = events
        .iter()
        .position(|event| matches!(event, StreamEvent::Chart { .. }))
        .expect("chart missing");
    let result_idx = events
        .iter()
        .position(|event| matches!(event, StreamEvent::ToolResult { .. }))
        .expect("tool_result missing");
    assert!(tool_use_idx < chart_idx, "tool_use must precede chart");
    assert!(chart_idx < result_idx, "chart must precede tool_result");

    let StreamEvent::Chart { content } = &events[chart_idx] else {
        unreachable!();
    };
    let chart: Value = serde_json::from_str(content).expect("chart payload is json");
    assert_eq!(chart["chart_type"], "bar");
    assert_eq!(chart["data"].as_array().unwrap().len(), 3);

    // 模型可见结果只保留摘要，不携带完整渲染负载。
    let StreamEvent::ToolResult { result, .. } = &events[result_idx] else {
        unreachable!();
    };
    assert!(result.get("chart_data").is_none());
    assert!(result["summary"].as_str().unwrap().contains("3 data points"));

    let narrative: String = events
        .iter()
        .filter_map(|event| match event {
            StreamEvent::Content { content } => Some(content.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(narrative, "Here is your chart.");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failing_tool_does_not_abort_the_turn() {
    let registry = default_registry();
    let flaky: Arc<astra_server::tools::ToolHandler> =
        Arc::new(|_args: Value| async { Err::<Value, _>(anyhow!("db down")) }.boxed());
    registry.register(
        DEFAULT_NAMESPACE,
        astra_server::schemas::ToolSpec {
            name: "flaky_lookup".to_string(),
            description: "lookup that fails".to_string(),
            input_schema: json!({ "type": "object" }),
        },
        Some(flaky),
    );
    let steps = vec![
        ScriptStep::tool_call("checking the db", Some("call_1"), "flaky_lookup", json!({})),
        ScriptStep::text(&["The lookup backend is unavailable right now."]),
    ];
    let orchestrator = orchestrator_from(registry, steps);
    let events = collect(&orchestrator, request("look something up")).await;

    assert_single_done_terminal(&events);
    assert!(
        !events.iter().any(|event| matches!(event, StreamEvent::Error { .. })),
        "tool failure must not surface as a stream error"
    );
    let result = events
        .iter()
        .find_map(|event| match event {
            StreamEvent::ToolResult { result, .. } => Some(result.clone()),
            _ => None,
        })
        .expect("tool_result missing");
    assert_eq!(result["success"], false);
    assert_eq!(result["error"], "db down");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn silent_turn_falls_back_to_tool_derived_text() {
    let steps = vec![
        ScriptStep::tool_call("", Some("call_1"), "dashboard_stats", json!({})),
        ScriptStep::silence(),
    ];
    let orchestrator = orchestrator_from(default_registry(), steps);
    let events = collect(&orchestrator, request("how many users do we have")).await;

    assert_single_done_terminal(&events);
    let contents: Vec<&String> = events
        .iter()
        .filter_map(|event| match event {
            StreamEvent::Content { content } => Some(content),
            _ => None,
        })
        .collect();
    assert_eq!(contents.len(), 1, "exactly one fallback content event");
    assert!(!contents[0].trim().is_empty());
    assert!(contents[0].contains("dashboard_stats"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unsupported_provider_yields_single_error_then_sentinel() {
    let orchestrator = orchestrator_from(default_registry(), vec![ScriptStep::silence()]);
    let mut req = request("hello");
    req.provider = "acme-cloud".to_string();
    let events = collect(&orchestrator, req).await;

    assert_eq!(events.len(), 2, "expected error + done, got {events:?}");
    assert!(matches!(&events[0], StreamEvent::Error { error } if error.contains("acme-cloud")));
    assert_eq!(events[1], StreamEvent::Done);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn tool_rounds_are_bounded() {
    // 模型永远要求再调一次工具，轮次预算必须兜底。
    let steps = vec![ScriptStep::tool_call(
        "one more",
        None,
        "list_users",
        json!({}),
    )];
    let orchestrator = orchestrator_from(default_registry(), steps);
    let events = collect(&orchestrator, request("keep listing users")).await;

    assert_single_done_terminal(&events);
    let tool_uses = events
        .iter()
        .filter(|event| matches!(event, StreamEvent::ToolUse { .. }))
        .count();
    assert_eq!(tool_uses, 5, "round budget is five tool rounds");
    assert!(
        !events.iter().any(|event| matches!(event, StreamEvent::Error { .. })),
        "budget exhaustion is a graceful end, not an error"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn validation_failure_consumes_exactly_one_round() {
    let steps = vec![
        ScriptStep::tool_call(
            "creating",
            Some("call_1"),
            "create_user",
            json!({ "name": "Grace" }),
        ),
        ScriptStep::text(&["I need an email address to create the account."]),
    ];
    let orchestrator = orchestrator_from(default_registry(), steps);
    let events = collect(&orchestrator, request("add grace")).await;

    assert_single_done_terminal(&events);
    let tool_uses = events
        .iter()
        .filter(|event| matches!(event, StreamEvent::ToolUse { .. }))
        .count();
    assert_eq!(tool_uses, 1);
    let result = events
        .iter()
        .find_map(|event| match event {
            StreamEvent::ToolResult { result, .. } => Some(result.clone()),
            _ => None,
        })
        .expect("tool_result missing");
    assert_eq!(result["success"], false);
    assert!(result["error"].as_str().unwrap().contains("email"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn thinking_state_never_leaks_across_turns() {
    let steps = vec![
        ScriptStep::tool_call("thinking", Some("call_1"), "list_users", json!({})),
        ScriptStep::text(&["Done."]),
    ];
    let orchestrator = orchestrator_from(default_registry(), steps);

    for _ in 0..2 {
        let events = collect(&orchestrator, request("list the users")).await;
        assert_single_done_terminal(&events);
        let thinking: Vec<&String> = events
            .iter()
            .filter_map(|event| match event {
                StreamEvent::Thinking { content } => Some(content),
                _ => None,
            })
            .collect();
        // 每轮第一条思考指示都是通用文案，不带上一轮的步骤编号。
        assert_eq!(thinking.len(), 1);
        assert_eq!(thinking[0], "Working on it...");
        let thinking_idx = events
            .iter()
            .position(|event| matches!(event, StreamEvent::Thinking { .. }))
            .unwrap();
        let tool_use_idx = events
            .iter()
            .position(|event| matches!(event, StreamEvent::ToolUse { .. }))
            .unwrap();
        assert!(thinking_idx < tool_use_idx);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_round_thinking_is_numbered() {
    let steps = vec![
        ScriptStep::tool_call("first look", Some("call_1"), "dashboard_stats", json!({})),
        ScriptStep::tool_call("digging deeper", Some("call_2"), "list_users", json!({})),
        ScriptStep::text(&["All done."]),
    ];
    let orchestrator = orchestrator_from(default_registry(), steps);
    let events = collect(&orchestrator, request("inspect the accounts")).await;

    let thinking: Vec<&String> = events
        .iter()
        .filter_map(|event| match event {
            StreamEvent::Thinking { content } => Some(content),
            _ => None,
        })
        .collect();
    assert_eq!(thinking.len(), 2);
    assert_eq!(thinking[0], "Working on it...");
    assert_eq!(thinking[1], "Step 2: working...");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropped_client_stops_the_turn_quietly() {
    let steps = vec![ScriptStep::tool_call(
        "looping",
        None,
        "list_users",
        json!({}),
    )];
    let orchestrator = orchestrator_from(default_registry(), steps);
    let mut stream = orchestrator
        .stream(request("list users forever"))
        .expect("stream should start");
    // 消费一个事件后模拟客户端断开。
    let first = stream.next().await;
    assert!(first.is_some());
    drop(stream);
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn invalid_request_is_rejected_before_streaming() {
    let orchestrator = orchestrator_from(default_registry(), vec![ScriptStep::silence()]);
    let mut req = request("hi");
    req.messages.clear();
    let err = orchestrator.stream(req).err().expect("empty history rejected");
    assert_eq!(err.code(), "INVALID_REQUEST");

    let mut req = request("hi");
    req.provider = "  ".to_string();
    let err = orchestrator.stream(req).err().expect("blank provider rejected");
    assert_eq!(err.code(), "INVALID_REQUEST");
}

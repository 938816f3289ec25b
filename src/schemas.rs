// API 请求与事件数据结构，保持与前端协议字段一致。
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Deserialize)]
pub struct ChatRequest {
    pub provider: String,
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn text(role: &str, content: impl Into<String>) -> Self {
        Self {
            role: role.to_string(),
            content: Value::String(content.into()),
            tool_calls: None,
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(rename = "input_tokens")]
    pub input: u64,
    #[serde(rename = "output_tokens")]
    pub output: u64,
    #[serde(rename = "total_tokens")]
    pub total: u64,
}

/// 单轮会话的出站事件。Done 是流结束哨兵，每轮恰好出现一次。
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Content {
        content: String,
    },
    Thinking {
        content: String,
    },
    ToolUse {
        tool: String,
        tool_call_id: String,
        args: String,
    },
    ToolResult {
        tool: String,
        tool_call_id: String,
        result: Value,
    },
    Chart {
        content: String,
    },
    Error {
        error: String,
    },
    Done,
}

impl StreamEvent {
    /// SSE 帧负载；Done 没有 JSON 负载，由传输层写出 "[DONE]" 哨兵帧。
    pub fn to_payload(&self) -> Option<Value> {
        match self {
            Self::Content { content } => Some(json!({ "content": content })),
            Self::Thinking { content } => {
                Some(json!({ "type": "thinking", "content": content }))
            }
            Self::ToolUse {
                tool,
                tool_call_id,
                args,
            } => Some(json!({
                "type": "tool_use",
                "tool": tool,
                "tool_call_id": tool_call_id,
                "args": args,
            })),
            Self::ToolResult {
                tool,
                tool_call_id,
                result,
            } => Some(json!({
                "type": "tool_result",
                "tool": tool,
                "tool_call_id": tool_call_id,
                "result": result,
            })),
            Self::Chart { content } => Some(json!({ "type": "chart", "content": content })),
            Self::Error { error } => Some(json!({ "error": error })),
            Self::Done => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_payload_shapes() {
        let content = StreamEvent::Content {
            content: "hello".to_string(),
        };
        assert_eq!(content.to_payload().unwrap(), json!({ "content": "hello" }));

        let tool_use = StreamEvent::ToolUse {
            tool: "render_chart".to_string(),
            tool_call_id: "call_1".to_string(),
            args: "{}".to_string(),
        };
        let payload = tool_use.to_payload().unwrap();
        assert_eq!(payload["type"], "tool_use");
        assert_eq!(payload["tool_call_id"], "call_1");

        assert!(StreamEvent::Done.to_payload().is_none());
    }
}

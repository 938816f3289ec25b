// 工具执行：解析绑定实现并把所有结局归一化为统一结果。
use super::RegisteredTool;
use serde_json::{json, Value};
use tracing::debug;

#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub ok: bool,
    pub data: Value,
    pub error: String,
}

impl ToolOutcome {
    pub fn success(data: Value) -> Self {
        Self {
            ok: true,
            data,
            error: String::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: Value::Null,
            error: message.into(),
        }
    }

    /// 模型与客户端看到的结果值：成功为原始负载，失败为统一错误形状。
    pub fn to_result_value(&self) -> Value {
        if self.ok {
            self.data.clone()
        } else {
            json!({ "success": false, "error": self.error })
        }
    }
}

/// 工具失败从不外抛：缺实现、执行报错、不返回结果都折叠成失败结局。
pub async fn execute_tool(tool: &RegisteredTool, args: Value) -> ToolOutcome {
    let Some(handler) = tool.handler.as_ref() else {
        return ToolOutcome::failure("handler not available");
    };
    match handler(args).await {
        Ok(Value::Null) => {
            debug!("tool {} returned no result", tool.spec.name);
            ToolOutcome::failure("no result returned")
        }
        Ok(value) => ToolOutcome::success(value),
        Err(err) => ToolOutcome::failure(err.to_string()),
    }
}

// LLM 适配：供应商解析与 OpenAI 兼容的流式 Chat Completions 调用。
use crate::config::LlmConfig;
use crate::schemas::{ChatMessage, TokenUsage};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const DEFAULT_SILICONFLOW_BASE_URL: &str = "https://api.siliconflow.cn/v1";
const DEFAULT_DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com";
const DEFAULT_MOONSHOT_BASE_URL: &str = "https://api.moonshot.ai/v1";
const DEFAULT_QWEN_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
const DEFAULT_GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";
const DEFAULT_MISTRAL_BASE_URL: &str = "https://api.mistral.ai/v1";
const DEFAULT_TOGETHER_BASE_URL: &str = "https://api.together.xyz/v1";
const DEFAULT_OLLAMA_BASE_URL: &str = "http://127.0.0.1:11434/v1";
const DEFAULT_LMSTUDIO_BASE_URL: &str = "http://127.0.0.1:1234/v1";

/// 模型流式输出的回调收口。返回 Err 表示下游不再消费，应立即中断请求。
#[async_trait]
pub trait DeltaSink: Send {
    async fn on_delta(&mut self, content: &str, reasoning: &str) -> Result<()>;
}

/// 一次模型生成段的最终结果。content 为已经通过回调下发的增量之和。
#[derive(Debug, Clone, Default)]
pub struct ModelTurn {
    pub content: String,
    pub reasoning: String,
    pub usage: Option<TokenUsage>,
    pub tool_calls: Vec<ToolCallRequest>,
}

#[derive(Debug, Clone)]
pub struct ToolCallRequest {
    pub id: Option<String>,
    pub name: String,
    pub arguments: String,
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    /// 发起一次生成调用。文本与思维增量必须经由 sink 实时下发，
    /// 返回值携带累计文本与本段请求的工具调用。
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[Value]>,
        sink: &mut dyn DeltaSink,
    ) -> Result<ModelTurn>;
}

/// 按供应商 id 解析可调用的模型句柄；密钥从进程环境读取。
pub trait ModelProvider: Send + Sync {
    fn get_model(&self, provider: &str, model: &str) -> Result<Arc<dyn ChatModel>>;
}

pub struct EnvModelProvider {
    http: Client,
    config: LlmConfig,
}

impl EnvModelProvider {
    pub fn new(http: Client, config: LlmConfig) -> Self {
        Self { http, config }
    }
}

impl ModelProvider for EnvModelProvider {
    fn get_model(&self, provider: &str, model: &str) -> Result<Arc<dyn ChatModel>> {
        let normalized = normalize_provider(Some(provider));
        let base_url = if normalized == "openai_compatible" {
            self.config
                .base_url
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(ToString::to_string)
                .ok_or_else(|| anyhow!("provider openai_compatible requires llm.base_url"))?
        } else {
            provider_default_base_url(&normalized)
                .map(ToString::to_string)
                .ok_or_else(|| anyhow!("unsupported provider: {provider}"))?
        };
        let api_key = get_api_key(&normalized);
        if api_key.is_none() && api_key_env(&normalized).is_some() {
            return Err(anyhow!(
                "missing API key for provider {normalized}: set {}",
                api_key_env(&normalized).unwrap_or_default()
            ));
        }
        let model = model.trim();
        if model.is_empty() {
            return Err(anyhow!("model name is required"));
        }
        Ok(Arc::new(LlmClient {
            http: self.http.clone(),
            base_url,
            api_key,
            model: model.to_string(),
            temperature: self.config.temperature,
            max_output: self.config.max_output,
        }))
    }
}

pub fn normalize_provider(provider: Option<&str>) -> String {
    let raw = provider.unwrap_or("openai_compatible").trim();
    if raw.is_empty() {
        return "openai_compatible".to_string();
    }
    let normalized = raw.to_ascii_lowercase().replace(['-', ' '], "_");
    match normalized.as_str() {
        "openai_compat" | "openai_compatible" => "openai_compatible".to_string(),
        "openai" | "openai_native" => "openai".to_string(),
        "openrouter" => "openrouter".to_string(),
        "silicon_flow" | "siliconflow" => "siliconflow".to_string(),
        "deepseek" => "deepseek".to_string(),
        "moonshot" | "kimi" => "moonshot".to_string(),
        "dashscope" | "qwen" => "qwen".to_string(),
        "groq" => "groq".to_string(),
        "mistral" => "mistral".to_string(),
        "together" => "together".to_string(),
        "ollama" => "ollama".to_string(),
        "lm_studio" | "lmstudio" => "lmstudio".to_string(),
        other => other.to_string(),
    }
}

pub fn provider_default_base_url(provider: &str) -> Option<&'static str> {
    match provider {
        "openai" => Some(DEFAULT_OPENAI_BASE_URL),
        "openrouter" => Some(DEFAULT_OPENROUTER_BASE_URL),
        "siliconflow" => Some(DEFAULT_SILICONFLOW_BASE_URL),
        "deepseek" => Some(DEFAULT_DEEPSEEK_BASE_URL),
        "moonshot" => Some(DEFAULT_MOONSHOT_BASE_URL),
        "qwen" => Some(DEFAULT_QWEN_BASE_URL),
        "groq" => Some(DEFAULT_GROQ_BASE_URL),
        "mistral" => Some(DEFAULT_MISTRAL_BASE_URL),
        "together" => Some(DEFAULT_TOGETHER_BASE_URL),
        "ollama" => Some(DEFAULT_OLLAMA_BASE_URL),
        "lmstudio" => Some(DEFAULT_LMSTUDIO_BASE_URL),
        _ => None,
    }
}

/// 每个供应商固定一个环境变量名；本地推理端点无需密钥。
pub fn api_key_env(provider: &str) -> Option<&'static str> {
    match provider {
        "openai" => Some("OPENAI_API_KEY"),
        "openrouter" => Some("OPENROUTER_API_KEY"),
        "siliconflow" => Some("SILICONFLOW_API_KEY"),
        "deepseek" => Some("DEEPSEEK_API_KEY"),
        "moonshot" => Some("MOONSHOT_API_KEY"),
        "qwen" => Some("DASHSCOPE_API_KEY"),
        "groq" => Some("GROQ_API_KEY"),
        "mistral" => Some("MISTRAL_API_KEY"),
        "together" => Some("TOGETHER_API_KEY"),
        "openai_compatible" => Some("ASTRA_LLM_API_KEY"),
        _ => None,
    }
}

pub fn get_api_key(provider: &str) -> Option<String> {
    let name = api_key_env(provider)?;
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub struct LlmClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: Option<f32>,
    max_output: Option<u32>,
}

#[async_trait]
impl ChatModel for LlmClient {
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[Value]>,
        sink: &mut dyn DeltaSink,
    ) -> Result<ModelTurn> {
        let mut include_usage = true;
        let mut usage_fallback = true;
        loop {
            let response = self
                .http
                .post(self.endpoint())
                .headers(self.headers())
                .json(&self.build_payload(messages, include_usage, tools))
                .send()
                .await?;
            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                // 个别兼容端点不认识 stream_options，去掉后重试一次。
                if usage_fallback && include_usage && matches!(status.as_u16(), 400 | 422) {
                    include_usage = false;
                    usage_fallback = false;
                    continue;
                }
                return Err(anyhow!(
                    "LLM stream request failed: {status} {}",
                    truncate_text(&text, 2048)
                ));
            }
            let mut stream = response.bytes_stream();
            let mut buffer = String::new();
            let mut combined = String::new();
            let mut reasoning_combined = String::new();
            let mut usage: Option<TokenUsage> = None;
            let mut tool_calls_accumulator: Vec<StreamToolCall> = Vec::new();
            let mut saw_done = false;
            while let Some(item) = stream.next().await {
                let bytes = item?;
                let part = String::from_utf8_lossy(&bytes);
                buffer.push_str(&part);
                while let Some(pos) = buffer.find('\n') {
                    let line = buffer[..pos].trim().to_string();
                    buffer = buffer[pos + 1..].to_string();
                    if line.is_empty() || !line.starts_with("data:") {
                        continue;
                    }
                    let data = line.trim_start_matches("data:").trim();
                    if data == "[DONE]" {
                        saw_done = true;
                        break;
                    }
                    match serde_json::from_str::<Value>(data) {
                        Ok(payload) => {
                            if let Some(new_usage) = normalize_usage(payload.get("usage")) {
                                usage = Some(new_usage);
                            }
                            let delta = payload
                                .get("choices")
                                .and_then(|value| value.get(0))
                                .and_then(|value| value.get("delta"))
                                .cloned()
                                .unwrap_or(Value::Null);
                            let content_delta =
                                delta.get("content").and_then(Value::as_str).unwrap_or("");
                            let reasoning_delta = delta
                                .get("reasoning_content")
                                .or_else(|| delta.get("reasoning"))
                                .and_then(Value::as_str)
                                .unwrap_or("");
                            update_stream_tool_calls(&mut tool_calls_accumulator, &delta);
                            if !content_delta.is_empty() {
                                combined.push_str(content_delta);
                            }
                            if !reasoning_delta.is_empty() {
                                reasoning_combined.push_str(reasoning_delta);
                            }
                            if !content_delta.is_empty() || !reasoning_delta.is_empty() {
                                sink.on_delta(content_delta, reasoning_delta).await?;
                            }
                        }
                        Err(err) => {
                            warn!(
                                "LLM stream json parse failed: {err}, data={}",
                                truncate_text(data, 512)
                            );
                        }
                    }
                }
                if saw_done {
                    break;
                }
            }
            if !saw_done {
                warn!("LLM stream ended without [DONE]");
            }
            return Ok(ModelTurn {
                content: combined,
                reasoning: reasoning_combined,
                usage,
                tool_calls: finalize_stream_tool_calls(&tool_calls_accumulator),
            });
        }
    }
}

impl LlmClient {
    fn endpoint(&self) -> String {
        let base = self.base_url.trim_end_matches('/');
        if base.ends_with("/v1") {
            format!("{base}/chat/completions")
        } else {
            format!("{base}/v1/chat/completions")
        }
    }

    fn headers(&self) -> reqwest::header::HeaderMap {
        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            if !api_key.is_empty() {
                let value = format!("Bearer {api_key}");
                if let Ok(header_value) = value.parse() {
                    headers.insert(reqwest::header::AUTHORIZATION, header_value);
                }
            }
        }
        headers
    }

    fn build_payload(
        &self,
        messages: &[ChatMessage],
        include_usage: bool,
        tools: Option<&[Value]>,
    ) -> Value {
        let mut payload = json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
        });
        if let Some(temperature) = self.temperature {
            payload["temperature"] = json!(temperature);
        }
        if include_usage {
            payload["stream_options"] = json!({ "include_usage": true });
        }
        if let Some(max_output) = self.max_output {
            if max_output > 0 {
                payload["max_tokens"] = json!(max_output);
            }
        }
        if let Some(tool_defs) = tools {
            if !tool_defs.is_empty() {
                payload["tools"] = Value::Array(tool_defs.to_vec());
                payload["tool_choice"] = json!("auto");
            }
        }
        payload
    }
}

fn normalize_usage(raw: Option<&Value>) -> Option<TokenUsage> {
    let raw = raw?;
    let Value::Object(map) = raw else {
        return None;
    };
    let to_u64 = |value: Option<&Value>| -> Option<u64> {
        match value {
            Some(Value::Number(num)) => num.as_u64(),
            Some(Value::String(text)) => text.trim().parse::<u64>().ok(),
            _ => None,
        }
    };
    let input = to_u64(map.get("input_tokens"))
        .or_else(|| to_u64(map.get("prompt_tokens")))
        .unwrap_or(0);
    let output = to_u64(map.get("output_tokens"))
        .or_else(|| to_u64(map.get("completion_tokens")))
        .unwrap_or(0);
    let total = to_u64(map.get("total_tokens")).unwrap_or(input + output);
    if input == 0 && output == 0 && total == 0 {
        return None;
    }
    Some(TokenUsage {
        input,
        output,
        total,
    })
}

#[derive(Debug, Default, Clone)]
struct StreamToolCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

fn update_stream_tool_calls(acc: &mut Vec<StreamToolCall>, delta: &Value) {
    let tool_calls_raw = delta.get("tool_calls").or_else(|| delta.get("tool_call"));
    let tool_calls = match tool_calls_raw {
        Some(Value::Array(items)) => Some(items.as_slice()),
        Some(Value::Object(_)) => tool_calls_raw.map(std::slice::from_ref),
        _ => None,
    };
    if let Some(items) = tool_calls {
        for item in items {
            if let Value::Object(map) = item {
                let index = map.get("index").and_then(Value::as_u64).unwrap_or(0) as usize;
                while acc.len() <= index {
                    acc.push(StreamToolCall::default());
                }
                let slot = &mut acc[index];
                if let Some(id) = map.get("id").and_then(Value::as_str) {
                    slot.id = Some(id.to_string());
                }
                if let Some(function) = map.get("function") {
                    apply_function_delta(slot, function);
                }
            }
        }
    }

    // 旧式 function_call 只有一个槽位。
    if let Some(function_call) = delta.get("function_call") {
        if acc.is_empty() {
            acc.push(StreamToolCall::default());
        }
        apply_function_delta(&mut acc[0], function_call);
    }
}

fn apply_function_delta(slot: &mut StreamToolCall, function: &Value) {
    if let Value::Object(map) = function {
        if let Some(name) = map.get("name").and_then(Value::as_str) {
            slot.name.push_str(name);
        }
        if let Some(arguments) = map.get("arguments").and_then(Value::as_str) {
            slot.arguments.push_str(arguments);
        }
    }
}

fn finalize_stream_tool_calls(acc: &[StreamToolCall]) -> Vec<ToolCallRequest> {
    acc.iter()
        .filter(|call| !call.name.trim().is_empty())
        .map(|call| ToolCallRequest {
            id: call.id.clone(),
            name: call.name.trim().to_string(),
            arguments: call.arguments.clone(),
        })
        .collect()
}

fn truncate_text(text: &str, max: usize) -> String {
    if text.len() <= max {
        return text.to_string();
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    let mut output = text[..end].to_string();
    output.push_str("...");
    output
}

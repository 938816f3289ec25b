/// 单轮会话允许的工具调用轮次上限；耗尽后平滑收束而非报错。
pub const MAX_TOOL_ROUNDS: usize = 5;

pub const STREAM_EVENT_QUEUE_SIZE: usize = 256;

pub const DEFAULT_LLM_TIMEOUT_S: u64 = 600;

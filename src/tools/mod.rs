// 工具注册表：命名空间、规格与绑定实现的查找入口。
use crate::schemas::ToolSpec;
use anyhow::Result;
use futures::future::BoxFuture;
use parking_lot::RwLock;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

mod builtin;
mod executor;
mod validate;

pub use builtin::{register_builtin_tools, UserDirectory, CHART_PAYLOAD_FIELD, CHART_TOOL};
pub use executor::{execute_tool, ToolOutcome};
pub use validate::validate_args;

pub const DEFAULT_NAMESPACE: &str = "default";

pub type ToolHandler = dyn Fn(Value) -> BoxFuture<'static, Result<Value>> + Send + Sync;

#[derive(Clone)]
pub struct RegisteredTool {
    pub spec: ToolSpec,
    pub handler: Option<Arc<ToolHandler>>,
}

#[derive(Default)]
pub struct ToolRegistry {
    namespaces: RwLock<HashMap<String, Vec<RegisteredTool>>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 同名工具在命名空间内唯一，重复注册覆盖旧条目。
    pub fn register(&self, namespace: &str, spec: ToolSpec, handler: Option<Arc<ToolHandler>>) {
        let mut guard = self.namespaces.write();
        let tools = guard.entry(namespace.to_string()).or_default();
        tools.retain(|tool| tool.spec.name != spec.name);
        tools.push(RegisteredTool { spec, handler });
    }

    pub fn list_namespaces(&self) -> Vec<String> {
        let mut names: Vec<String> = self.namespaces.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn list_tools(&self, namespace: &str) -> Vec<RegisteredTool> {
        self.namespaces
            .read()
            .get(namespace)
            .cloned()
            .unwrap_or_default()
    }

    pub fn find_tool(&self, namespace: &str, name: &str) -> Option<RegisteredTool> {
        self.namespaces
            .read()
            .get(namespace)?
            .iter()
            .find(|tool| tool.spec.name == name)
            .cloned()
    }
}

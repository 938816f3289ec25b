// 内置工具：图表渲染、统计概览与用户管理，默认命名空间注册入口。
use super::{ToolHandler, ToolRegistry, DEFAULT_NAMESPACE};
use crate::schemas::ToolSpec;
use anyhow::{anyhow, Result};
use chrono::Utc;
use futures::FutureExt;
use parking_lot::RwLock;
use serde_json::{json, Value};
use std::future::Future;
use std::sync::Arc;
use uuid::Uuid;

pub const CHART_TOOL: &str = "render_chart";
/// 图表工具结果里承载完整渲染负载的字段，适配层会把它从模型可见
/// 结果中摘出，单独推给客户端。
pub const CHART_PAYLOAD_FIELD: &str = "chart_data";

const SUPPORTED_CHART_TYPES: [&str; 4] = ["bar", "line", "pie", "area"];

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub id: String,
    pub name: String,
    pub email: String,
    pub role: String,
    pub deleted: bool,
    pub created_at: String,
}

impl UserRecord {
    fn to_value(&self) -> Value {
        json!({
            "id": self.id,
            "name": self.name,
            "email": self.email,
            "role": self.role,
            "deleted": self.deleted,
            "created_at": self.created_at,
        })
    }
}

/// 进程内用户名录。真实部署里这是外部持久层的代理，接口保持一致。
#[derive(Default)]
pub struct UserDirectory {
    users: RwLock<Vec<UserRecord>>,
}

impl UserDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seed_data() -> Self {
        let directory = Self::new();
        for (name, email, role) in [
            ("Alice Zhang", "alice@astra.local", "admin"),
            ("Bruno Costa", "bruno@astra.local", "manager"),
            ("Chen Wei", "chen@astra.local", "member"),
        ] {
            let _ = directory.create(name, email, role);
        }
        directory
    }

    pub fn create(&self, name: &str, email: &str, role: &str) -> Result<UserRecord> {
        let name = name.trim();
        let email = email.trim().to_lowercase();
        if name.is_empty() {
            return Err(anyhow!("user name is required"));
        }
        if email.is_empty() {
            return Err(anyhow!("user email is required"));
        }
        let mut guard = self.users.write();
        if guard.iter().any(|user| user.email == email) {
            return Err(anyhow!("a user with email {email} already exists"));
        }
        let record = UserRecord {
            id: format!("usr_{}", Uuid::new_v4().simple()),
            name: name.to_string(),
            email,
            role: normalize_role(role),
            deleted: false,
            created_at: Utc::now().to_rfc3339(),
        };
        guard.push(record.clone());
        Ok(record)
    }

    pub fn update(
        &self,
        id: &str,
        name: Option<&str>,
        email: Option<&str>,
        role: Option<&str>,
    ) -> Result<UserRecord> {
        let mut guard = self.users.write();
        let email = email
            .map(|value| value.trim().to_lowercase())
            .filter(|value| !value.is_empty());
        if let Some(email) = email.as_ref() {
            if guard
                .iter()
                .any(|user| user.email == *email && user.id != id)
            {
                return Err(anyhow!("a user with email {email} already exists"));
            }
        }
        let user = guard
            .iter_mut()
            .find(|user| user.id == id && !user.deleted)
            .ok_or_else(|| anyhow!("user not found: {id}"))?;
        if let Some(name) = name.map(str::trim).filter(|value| !value.is_empty()) {
            user.name = name.to_string();
        }
        if let Some(email) = email {
            user.email = email;
        }
        if let Some(role) = role.map(str::trim).filter(|value| !value.is_empty()) {
            user.role = normalize_role(role);
        }
        Ok(user.clone())
    }

    /// 软删除：记录保留，restore 可恢复。
    pub fn delete(&self, id: &str) -> Result<UserRecord> {
        let mut guard = self.users.write();
        let user = guard
            .iter_mut()
            .find(|user| user.id == id && !user.deleted)
            .ok_or_else(|| anyhow!("user not found: {id}"))?;
        user.deleted = true;
        Ok(user.clone())
    }

    pub fn restore(&self, id: &str) -> Result<UserRecord> {
        let mut guard = self.users.write();
        let user = guard
            .iter_mut()
            .find(|user| user.id == id && user.deleted)
            .ok_or_else(|| anyhow!("no deleted user with id {id}"))?;
        user.deleted = false;
        Ok(user.clone())
    }

    pub fn search(&self, query: &str) -> Vec<UserRecord> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return Vec::new();
        }
        self.users
            .read()
            .iter()
            .filter(|user| {
                user.name.to_lowercase().contains(&query) || user.email.contains(&query)
            })
            .cloned()
            .collect()
    }

    pub fn list(&self, include_deleted: bool) -> Vec<UserRecord> {
        self.users
            .read()
            .iter()
            .filter(|user| include_deleted || !user.deleted)
            .cloned()
            .collect()
    }

    pub fn stats(&self) -> Value {
        let guard = self.users.read();
        let total = guard.len();
        let deleted = guard.iter().filter(|user| user.deleted).count();
        let mut by_role = serde_json::Map::new();
        for user in guard.iter().filter(|user| !user.deleted) {
            let counter = by_role.entry(user.role.clone()).or_insert(json!(0));
            if let Some(current) = counter.as_u64() {
                *counter = json!(current + 1);
            }
        }
        json!({
            "total": total,
            "active": total - deleted,
            "deleted": deleted,
            "by_role": by_role,
        })
    }
}

fn normalize_role(role: &str) -> String {
    let cleaned = role.trim().to_lowercase();
    if cleaned.is_empty() {
        "member".to_string()
    } else {
        cleaned
    }
}

fn handler<F, Fut>(f: F) -> Arc<ToolHandler>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    Arc::new(move |args| f(args).boxed())
}

fn arg_str(args: &Value, key: &str) -> String {
    args.get(key)
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim()
        .to_string()
}

fn arg_opt(args: &Value, key: &str) -> Option<String> {
    let value = arg_str(args, key);
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

/// 把默认命名空间的工具挂进注册表。能力目录由这里单点维护，
/// 提示词构建与模型适配都按它动态生成。
pub fn register_builtin_tools(registry: &ToolRegistry, directory: Arc<UserDirectory>) {
    register_chart_tool(registry);
    register_stats_tool(registry, directory.clone());
    register_user_tools(registry, directory);
}

fn register_chart_tool(registry: &ToolRegistry) {
    registry.register(
        DEFAULT_NAMESPACE,
        ToolSpec {
            name: CHART_TOOL.to_string(),
            description: "Render a chart on the dashboard from labelled data points.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "chart_type": {
                        "type": "string",
                        "description": "One of bar, line, pie, area."
                    },
                    "title": { "type": "string", "description": "Chart heading shown to the user." },
                    "data": {
                        "type": "array",
                        "description": "Data points, each { label, value }.",
                        "items": {
                            "type": "object",
                            "properties": {
                                "label": { "type": "string" },
                                "value": { "type": "number" }
                            },
                            "required": ["label", "value"]
                        }
                    }
                },
                "required": ["chart_type", "title", "data"]
            }),
        },
        Some(handler(|args: Value| async move {
            let chart_type = arg_str(&args, "chart_type").to_lowercase();
            if !SUPPORTED_CHART_TYPES.contains(&chart_type.as_str()) {
                return Err(anyhow!(
                    "unsupported chart_type: {chart_type}, expected one of bar/line/pie/area"
                ));
            }
            let title = arg_str(&args, "title");
            let data = args
                .get("data")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            if data.is_empty() {
                return Err(anyhow!("chart data must contain at least one point"));
            }
            for point in &data {
                let label_ok = point
                    .get("label")
                    .and_then(Value::as_str)
                    .map(|value| !value.trim().is_empty())
                    .unwrap_or(false);
                let value_ok = point.get("value").map(Value::is_number).unwrap_or(false);
                if !label_ok || !value_ok {
                    return Err(anyhow!("each data point needs a label and a numeric value"));
                }
            }
            Ok(json!({
                "summary": format!(
                    "Rendered a {chart_type} chart \"{title}\" with {} data points.",
                    data.len()
                ),
                CHART_PAYLOAD_FIELD: {
                    "chart_type": chart_type,
                    "title": title,
                    "data": data,
                    "generated_at": Utc::now().to_rfc3339(),
                },
            }))
        })),
    );
}

fn register_stats_tool(registry: &ToolRegistry, directory: Arc<UserDirectory>) {
    registry.register(
        DEFAULT_NAMESPACE,
        ToolSpec {
            name: "dashboard_stats".to_string(),
            description: "Fetch aggregate account statistics for the admin dashboard.".to_string(),
            input_schema: json!({ "type": "object", "properties": {} }),
        },
        Some(handler(move |_args: Value| {
            let directory = directory.clone();
            async move { Ok(json!({ "users": directory.stats() })) }
        })),
    );
}

fn register_user_tools(registry: &ToolRegistry, directory: Arc<UserDirectory>) {
    let dir = directory.clone();
    registry.register(
        DEFAULT_NAMESPACE,
        ToolSpec {
            name: "create_user".to_string(),
            description: "Create a new user account.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string" },
                    "email": { "type": "string" },
                    "role": { "type": "string", "description": "admin, manager or member; defaults to member." }
                },
                "required": ["name", "email"]
            }),
        },
        Some(handler(move |args: Value| {
            let dir = dir.clone();
            async move {
                let user = dir.create(
                    &arg_str(&args, "name"),
                    &arg_str(&args, "email"),
                    &arg_str(&args, "role"),
                )?;
                Ok(json!({ "user": user.to_value() }))
            }
        })),
    );

    let dir = directory.clone();
    registry.register(
        DEFAULT_NAMESPACE,
        ToolSpec {
            name: "update_user".to_string(),
            description: "Update name, email or role of an existing user by id.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "id": { "type": "string" },
                    "name": { "type": "string" },
                    "email": { "type": "string" },
                    "role": { "type": "string" }
                },
                "required": ["id"]
            }),
        },
        Some(handler(move |args: Value| {
            let dir = dir.clone();
            async move {
                let user = dir.update(
                    &arg_str(&args, "id"),
                    arg_opt(&args, "name").as_deref(),
                    arg_opt(&args, "email").as_deref(),
                    arg_opt(&args, "role").as_deref(),
                )?;
                Ok(json!({ "user": user.to_value() }))
            }
        })),
    );

    let dir = directory.clone();
    registry.register(
        DEFAULT_NAMESPACE,
        ToolSpec {
            name: "delete_user".to_string(),
            description: "Soft-delete a user by id; the account can be restored later.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": { "id": { "type": "string" } },
                "required": ["id"]
            }),
        },
        Some(handler(move |args: Value| {
            let dir = dir.clone();
            async move {
                let user = dir.delete(&arg_str(&args, "id"))?;
                Ok(json!({ "user": user.to_value() }))
            }
        })),
    );

    let dir = directory.clone();
    registry.register(
        DEFAULT_NAMESPACE,
        ToolSpec {
            name: "restore_user".to_string(),
            description: "Restore a previously deleted user by id.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": { "id": { "type": "string" } },
                "required": ["id"]
            }),
        },
        Some(handler(move |args: Value| {
            let dir = dir.clone();
            async move {
                let user = dir.restore(&arg_str(&args, "id"))?;
                Ok(json!({ "user": user.to_value() }))
            }
        })),
    );

    let dir = directory.clone();
    registry.register(
        DEFAULT_NAMESPACE,
        ToolSpec {
            name: "search_users".to_string(),
            description: "Search users by name or email fragment.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": { "query": { "type": "string" } },
                "required": ["query"]
            }),
        },
        Some(handler(move |args: Value| {
            let dir = dir.clone();
            async move {
                let users: Vec<Value> = dir
                    .search(&arg_str(&args, "query"))
                    .iter()
                    .map(UserRecord::to_value)
                    .collect();
                Ok(json!({ "total": users.len(), "users": users }))
            }
        })),
    );

    let dir = directory;
    registry.register(
        DEFAULT_NAMESPACE,
        ToolSpec {
            name: "list_users".to_string(),
            description: "List user accounts, optionally including deleted ones.".to_string(),
            input_schema: json!({
                "type": "object",
                "properties": {
                    "include_deleted": { "type": "boolean" }
                }
            }),
        },
        Some(handler(move |args: Value| {
            let dir = dir.clone();
            async move {
                let include_deleted = args
                    .get("include_deleted")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                let users: Vec<Value> = dir
                    .list(include_deleted)
                    .iter()
                    .map(UserRecord::to_value)
                    .collect();
                Ok(json!({ "total": users.len(), "users": users }))
            }
        })),
    );
}

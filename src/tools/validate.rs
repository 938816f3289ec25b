// 参数校验：按工具声明的结构化 schema 检查原始参数。
use serde_json::{Map, Value};

/// 校验通过返回规范化后的参数，失败返回一条可读错误。
/// 无 schema 视为无约束，参数原样放行；Null 参数规范化为空对象。
pub fn validate_args(schema: Option<&Value>, args: &Value) -> Result<Value, String> {
    let normalized = match args {
        Value::Null => Value::Object(Map::new()),
        other => other.clone(),
    };
    let Some(schema) = schema else {
        return Ok(normalized);
    };
    let Some(schema_obj) = schema.as_object() else {
        return Ok(normalized);
    };
    if schema_obj
        .get("type")
        .and_then(Value::as_str)
        .map(|value| value != "object")
        .unwrap_or(false)
    {
        return Ok(normalized);
    }

    let Some(args_obj) = normalized.as_object() else {
        return Err(format!(
            "arguments must be a JSON object, got {}",
            value_kind(&normalized)
        ));
    };

    if let Some(required) = schema_obj.get("required").and_then(Value::as_array) {
        for entry in required {
            let Some(name) = entry.as_str() else {
                continue;
            };
            let missing = match args_obj.get(name) {
                None | Some(Value::Null) => true,
                Some(_) => false,
            };
            if missing {
                return Err(format!("missing required argument: {name}"));
            }
        }
    }

    if let Some(properties) = schema_obj.get("properties").and_then(Value::as_object) {
        for (name, property) in properties {
            let Some(value) = args_obj.get(name) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            let Some(expected) = property.get("type").and_then(Value::as_str) else {
                continue;
            };
            if !type_matches(expected, value) {
                return Err(format!(
                    "argument {name} expects {expected}, got {}",
                    value_kind(value)
                ));
            }
        }
    }

    Ok(normalized)
}

fn type_matches(expected: &str, value: &Value) -> bool {
    match expected {
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => value.is_i64() || value.is_u64(),
        "boolean" => value.is_boolean(),
        "array" => value.is_array(),
        "object" => value.is_object(),
        // 未知类型声明不拦截，保持对良构 schema 的兼容。
        _ => true,
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// 配置读取与环境变量覆盖，保持与 YAML 配置格式兼容。
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cors: CorsConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CorsConfig {
    pub allow_origins: Option<Vec<String>>,
    pub allow_credentials: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub default_provider: String,
    #[serde(default)]
    pub default_model: String,
    /// openai_compatible 供应商没有内置地址，必须在这里给出。
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub max_output: Option<u32>,
    #[serde(default)]
    pub timeout_s: Option<u64>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            default_provider: "openai".to_string(),
            default_model: "gpt-4o-mini".to_string(),
            base_url: None,
            temperature: None,
            max_output: None,
            timeout_s: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    pub log_level: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

pub fn default_config_path() -> PathBuf {
    env::var("ASTRA_CONFIG")
        .ok()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.yaml"))
}

pub fn load_config(path: &Path) -> Config {
    let raw = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(_) => return Config::default(),
    };
    if raw.trim().is_empty() {
        return Config::default();
    }
    let expanded = expand_env_placeholders(&raw);
    match serde_yaml::from_str::<Config>(&expanded) {
        Ok(config) => config,
        Err(err) => {
            warn!("failed to parse {}: {err}, falling back to defaults", path.display());
            Config::default()
        }
    }
}

/// 展开 `${VAR}` 与 `${VAR:-default}` 占位符，未设置且无默认值时替换为空串。
pub fn expand_env_placeholders(raw: &str) -> String {
    let mut output = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("${") {
        output.push_str(&rest[..start]);
        let tail = &rest[start + 2..];
        let Some(end) = tail.find('}') else {
            output.push_str(&rest[start..]);
            return output;
        };
        let inner = &tail[..end];
        let (name, fallback) = match inner.split_once(":-") {
            Some((name, fallback)) => (name, Some(fallback)),
            None => (inner, None),
        };
        match env::var(name) {
            Ok(value) if !value.is_empty() => output.push_str(&value),
            _ => {
                if let Some(fallback) = fallback {
                    output.push_str(fallback);
                }
            }
        }
        rest = &tail[end + 1..];
    }
    output.push_str(rest);
    output
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expand_env_placeholders() {
        std::env::remove_var("ASTRA_TEST_PLACEHOLDER");
        assert_eq!(
            expand_env_placeholders("${ASTRA_TEST_PLACEHOLDER:-default}"),
            "default"
        );
        assert_eq!(
            expand_env_placeholders("prefix-${ASTRA_TEST_PLACEHOLDER:-d}-suffix"),
            "prefix-d-suffix"
        );

        std::env::set_var("ASTRA_TEST_PLACEHOLDER", "value");
        assert_eq!(
            expand_env_placeholders("${ASTRA_TEST_PLACEHOLDER:-default}"),
            "value"
        );
        assert_eq!(
            expand_env_placeholders("prefix-${ASTRA_TEST_PLACEHOLDER}-suffix"),
            "prefix-value-suffix"
        );

        std::env::remove_var("ASTRA_TEST_PLACEHOLDER");
        assert_eq!(expand_env_placeholders("${ASTRA_TEST_PLACEHOLDER}"), "");
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.llm.default_provider, "openai");
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_parse_partial_yaml() {
        let raw = "server:\n  host: 127.0.0.1\n  port: 9001\n";
        let config: Config = serde_yaml::from_str(raw).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 9001);
        assert_eq!(config.llm.default_model, "gpt-4o-mini");
    }
}

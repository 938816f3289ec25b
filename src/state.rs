// 全局状态：配置、工具注册表、供应商表与调度器。
use crate::config::Config;
use crate::llm::EnvModelProvider;
use crate::orchestrator::Orchestrator;
use crate::tools::{register_builtin_tools, ToolRegistry, UserDirectory};
use std::sync::Arc;

pub struct AppState {
    pub config: Config,
    pub registry: Arc<ToolRegistry>,
    pub directory: Arc<UserDirectory>,
    pub orchestrator: Arc<Orchestrator>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let registry = Arc::new(ToolRegistry::new());
        let directory = Arc::new(UserDirectory::with_seed_data());
        register_builtin_tools(&registry, directory.clone());
        let providers = Arc::new(EnvModelProvider::new(
            reqwest::Client::new(),
            config.llm.clone(),
        ));
        let orchestrator = Arc::new(Orchestrator::new(
            registry.clone(),
            providers,
            config.llm.clone(),
        ));
        Self {
            config,
            registry,
            directory,
            orchestrator,
        }
    }
}

//! 编排器构建：统一的组件初始化逻辑
//!
//! CLI 与 Web 共用同一套装配：LLM → 工具执行器 → 各领域响应器 → 注册表 → 分类器 → 记忆网关。
//! 任一组件都可以在 build 前替换（测试里注入脚本化的 LLM、工具与记忆）。

use std::sync::Arc;
use std::time::Duration;

use crate::config::AppConfig;
use crate::core::{ConciergeError, Orchestrator, OrchestratorSettings};
use crate::llm::{LlmClient, MockLlmClient, OpenAiClient};
use crate::memory::{create_memory_gateway, MemoryGateway};
use crate::responders::{DomainProfile, DomainResponder};
use crate::routing::{Classifier, DomainEntry, DomainRegistry, LlmSemanticClassifier, SemanticClassifier};
use crate::tools::{register_search_tools, ToolExecutor, ToolRegistry};

const GROQ_BASE_URL: &str = "https://api.groq.com/openai/v1";

/// 按配置创建 LLM 客户端；provider 为 mock 或找不到 API Key 时使用 Mock
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    if provider == "mock" {
        tracing::info!("Using Mock LLM");
        return Arc::new(MockLlmClient::new());
    }

    let api_key = std::env::var(&cfg.llm.api_key_env)
        .ok()
        .filter(|k| !k.trim().is_empty());
    let Some(api_key) = api_key else {
        tracing::warn!(
            env = %cfg.llm.api_key_env,
            "No API key set, using Mock LLM"
        );
        return Arc::new(MockLlmClient::new());
    };

    let base_url = cfg.llm.base_url.clone().or_else(|| match provider.as_str() {
        "groq" => Some(GROQ_BASE_URL.to_string()),
        _ => None,
    });
    tracing::info!(provider = %provider, model = %cfg.llm.model, "Using OpenAI-compatible LLM");
    Arc::new(
        OpenAiClient::new(base_url.as_deref(), &cfg.llm.model, &api_key)
            .with_temperature(cfg.llm.temperature),
    )
}

/// 构建工具注册表（所有接入方式共享同一套工具）
pub fn build_tool_registry(cfg: &AppConfig) -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    register_search_tools(
        &mut tools,
        &cfg.tools.search,
        Duration::from_secs(cfg.tools.tool_timeout_secs),
    );
    tools
}

/// 编排器构建器
pub struct OrchestratorBuilder {
    config: AppConfig,
    llm: Option<Arc<dyn LlmClient>>,
    tools: Option<ToolRegistry>,
    memory: Option<Arc<dyn MemoryGateway>>,
    semantic: Option<Arc<dyn SemanticClassifier>>,
}

impl OrchestratorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llm: None,
            tools: None,
            memory: None,
            semantic: None,
        }
    }

    pub fn with_llm(mut self, llm: Arc<dyn LlmClient>) -> Self {
        self.llm = Some(llm);
        self
    }

    pub fn with_tools(mut self, tools: ToolRegistry) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn with_memory(mut self, memory: Arc<dyn MemoryGateway>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn with_semantic(mut self, semantic: Arc<dyn SemanticClassifier>) -> Self {
        self.semantic = Some(semantic);
        self
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 校验配置并装配全部组件
    pub fn build(self) -> Result<Orchestrator, ConciergeError> {
        let cfg = self.config;
        cfg.validate()?;

        let llm = self.llm.unwrap_or_else(|| create_llm_from_config(&cfg));
        let tools = self.tools.unwrap_or_else(|| build_tool_registry(&cfg));
        let executor = Arc::new(ToolExecutor::new(
            tools,
            Duration::from_secs(cfg.tools.tool_timeout_secs),
        ));

        let entries = cfg
            .routing
            .domains
            .iter()
            .map(|section| {
                let profile = DomainProfile::from(section);
                let label = profile.memory_label.clone();
                let responder = DomainResponder::new(
                    profile,
                    Arc::clone(&llm),
                    Arc::clone(&executor),
                    cfg.classifier.history_turns,
                );
                DomainEntry::new(&section.name, Arc::new(responder))
                    .with_keywords(section.keywords.iter().cloned())
                    .with_memory_label(label)
            })
            .collect();
        let registry = Arc::new(DomainRegistry::new(entries, &cfg.routing.fallback)?);

        let mut classifier = Classifier::new(&registry, &cfg.classifier);
        if cfg.classifier.semantic {
            let semantic = match self.semantic {
                Some(s) => Some(s),
                // Mock 无法给出有意义的分类结果，只会让每次请求都降级
                None if llm.describe() == "mock" => None,
                None => Some(Arc::new(LlmSemanticClassifier::new(Arc::clone(&llm)))
                    as Arc<dyn SemanticClassifier>),
            };
            if let Some(s) = semantic {
                classifier = classifier.with_semantic(s);
            }
        }

        let memory = self
            .memory
            .unwrap_or_else(|| create_memory_gateway(&cfg.memory));

        tracing::info!(
            domains = registry.list().len(),
            fallback = %registry.fallback(),
            memory = memory.name(),
            llm = %llm.describe(),
            "Orchestrator ready"
        );

        Ok(Orchestrator::new(
            registry,
            Arc::new(classifier),
            memory,
            OrchestratorSettings::from(&cfg),
        ))
    }
}

/// 便捷函数：按配置创建编排器
pub fn create_orchestrator(cfg: &AppConfig) -> Result<Orchestrator, ConciergeError> {
    OrchestratorBuilder::new(cfg.clone()).build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Request;
    use crate::routing::{Domain, RoutingTier};

    fn mock_config() -> AppConfig {
        let mut cfg = AppConfig::default();
        cfg.llm.provider = "mock".to_string();
        cfg
    }

    #[tokio::test]
    async fn test_default_config_builds_six_domains() {
        let orch = create_orchestrator(&mock_config()).unwrap();
        let names: Vec<&str> = orch.domains().iter().map(|d| d.as_str()).collect();
        assert_eq!(
            names,
            vec!["jobs", "finance", "travel", "shopping", "recipes", "research"]
        );
        assert_eq!(orch.health().len(), 6);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let mut cfg = mock_config();
        cfg.routing.fallback = "weather".to_string();
        assert!(matches!(
            create_orchestrator(&cfg).err(),
            Some(ConciergeError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_every_routed_domain_resolves() {
        let orch = create_orchestrator(&mock_config()).unwrap();
        for msg in ["", "Find remote Python jobs", "cheap flights to Lisbon", "hello"] {
            let decision = orch.route(&Request::new("u", msg)).await;
            assert!(orch.registry().resolve(&decision.domain).is_ok());
        }
        let decision = orch.route(&Request::new("u", "hello")).await;
        assert_eq!(decision.domain, Domain::new("research"));
        assert_eq!(decision.tier, RoutingTier::Fallback);
    }
}

//! 应用配置：内置默认值 → config/default.toml → 指定文件 → 环境变量
//!
//! 环境变量 `CONCIERGE__*` 覆盖（双下划线表示嵌套，如 `CONCIERGE__ROUTING__FALLBACK=jobs`）。
//! 加载后必须调用 [`AppConfig::validate`]：领域集合与超时关系在启动时校验，运行期不再检查。

use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::ConciergeError;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub routing: RoutingSection,
    pub classifier: ClassifierSection,
    pub orchestrator: OrchestratorSection,
    pub memory: MemorySection,
    pub tools: ToolsSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize, Default)]
pub struct AppSection {
    pub name: Option<String>,
}

/// [llm] 段：OpenAI 兼容端点，默认走 Groq
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// groq / openai / mock
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    /// 读取 API Key 的环境变量名
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// 生成温度（领域响应器使用）
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

fn default_provider() -> String {
    "groq".to_string()
}

fn default_model() -> String {
    "llama-3.1-8b-instant".to_string()
}

fn default_api_key_env() -> String {
    "GROQ_API_KEY".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            api_key_env: default_api_key_env(),
            temperature: default_temperature(),
        }
    }
}

/// [routing] 段：有序领域列表（顺序即关键词匹配优先级）与兜底领域
#[derive(Debug, Clone, Deserialize)]
pub struct RoutingSection {
    #[serde(default = "default_domains")]
    pub domains: Vec<DomainSection>,
    #[serde(default = "default_fallback")]
    pub fallback: String,
}

impl Default for RoutingSection {
    fn default() -> Self {
        Self {
            domains: default_domains(),
            fallback: default_fallback(),
        }
    }
}

fn default_fallback() -> String {
    "research".to_string()
}

/// [[routing.domains]]：单个领域的关键词与响应器画像
#[derive(Debug, Clone, Deserialize)]
pub struct DomainSection {
    pub name: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    /// 开始处理时推送的状态提示
    #[serde(default)]
    pub status: String,
    /// 响应器的角色设定（system prompt）
    #[serde(default)]
    pub persona: String,
    /// 写入长期记忆时的摘要前缀，如 "Job Search"
    #[serde(default)]
    pub memory_label: Option<String>,
    pub tool: Option<ToolBindingSection>,
}

/// 领域绑定的工具：essential 为 true 时工具失败即终止回答
#[derive(Debug, Clone, Deserialize)]
pub struct ToolBindingSection {
    pub name: String,
    /// 追加在查询后的后缀，如 "financial news"
    pub query_suffix: Option<String>,
    #[serde(default)]
    pub essential: bool,
}

/// [classifier] 段：第二级语义分类
#[derive(Debug, Clone, Deserialize)]
pub struct ClassifierSection {
    /// 关键词未命中时是否调用 LLM 分类
    #[serde(default = "default_true")]
    pub semantic: bool,
    #[serde(default = "default_semantic_timeout_ms")]
    pub timeout_ms: u64,
    /// 传给语义分类的最近对话轮数
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,
}

fn default_true() -> bool {
    true
}

fn default_semantic_timeout_ms() -> u64 {
    3_000
}

fn default_history_turns() -> usize {
    4
}

impl Default for ClassifierSection {
    fn default() -> Self {
        Self {
            semantic: true,
            timeout_ms: default_semantic_timeout_ms(),
            history_turns: default_history_turns(),
        }
    }
}

/// [orchestrator] 段：请求截止时间、分类超时、转发缓冲与取消宽限
#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorSection {
    #[serde(default = "default_deadline_secs")]
    pub deadline_secs: u64,
    #[serde(default = "default_classify_timeout_ms")]
    pub classify_timeout_ms: u64,
    /// 调用方通道容量（事件条数）；满时暂停拉取响应器输出
    #[serde(default = "default_relay_buffer")]
    pub relay_buffer: usize,
    /// 取消后等待响应器吐出 cancelled 片段的时间
    #[serde(default = "default_cancel_grace_ms")]
    pub cancel_grace_ms: u64,
}

fn default_deadline_secs() -> u64 {
    60
}

fn default_classify_timeout_ms() -> u64 {
    5_000
}

fn default_relay_buffer() -> usize {
    8
}

fn default_cancel_grace_ms() -> u64 {
    250
}

impl Default for OrchestratorSection {
    fn default() -> Self {
        Self {
            deadline_secs: default_deadline_secs(),
            classify_timeout_ms: default_classify_timeout_ms(),
            relay_buffer: default_relay_buffer(),
            cancel_grace_ms: default_cancel_grace_ms(),
        }
    }
}

/// 长期记忆后端
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MemoryBackend {
    #[default]
    Memory,
    Jsonl,
    None,
}

/// [memory] 段
#[derive(Debug, Clone, Deserialize)]
pub struct MemorySection {
    #[serde(default)]
    pub backend: MemoryBackend,
    /// jsonl 后端的文件路径，默认 data/memory.jsonl
    pub path: Option<PathBuf>,
    #[serde(default = "default_query_limit")]
    pub query_limit: usize,
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

fn default_query_limit() -> usize {
    5
}

fn default_query_timeout_ms() -> u64 {
    2_000
}

fn default_max_entries() -> usize {
    1000
}

impl Default for MemorySection {
    fn default() -> Self {
        Self {
            backend: MemoryBackend::default(),
            path: None,
            query_limit: default_query_limit(),
            query_timeout_ms: default_query_timeout_ms(),
            max_entries: default_max_entries(),
        }
    }
}

impl MemorySection {
    pub fn jsonl_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| PathBuf::from("data/memory.jsonl"))
    }
}

/// [tools] 段：单次工具调用超时与搜索配置
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
    #[serde(default)]
    pub search: SearchSection,
}

fn default_tool_timeout_secs() -> u64 {
    15
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
            search: SearchSection::default(),
        }
    }
}

/// [tools.search] 段：SerpApi 兼容的搜索端点
#[derive(Debug, Clone, Deserialize)]
pub struct SearchSection {
    #[serde(default = "default_search_base_url")]
    pub base_url: String,
    #[serde(default = "default_search_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_search_results")]
    pub results: usize,
    #[serde(default = "default_max_result_chars")]
    pub max_result_chars: usize,
}

fn default_search_base_url() -> String {
    "https://serpapi.com/search.json".to_string()
}

fn default_search_api_key_env() -> String {
    "SERPAPI_KEY".to_string()
}

fn default_search_results() -> usize {
    5
}

fn default_max_result_chars() -> usize {
    4000
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            base_url: default_search_base_url(),
            api_key_env: default_search_api_key_env(),
            results: default_search_results(),
            max_result_chars: default_max_result_chars(),
        }
    }
}

fn domain(
    name: &str,
    keywords: &[&str],
    status: &str,
    persona: &str,
    memory_label: &str,
    tool: Option<(&str, Option<&str>)>,
) -> DomainSection {
    DomainSection {
        name: name.to_string(),
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        status: status.to_string(),
        persona: persona.to_string(),
        memory_label: Some(memory_label.to_string()),
        tool: tool.map(|(name, suffix)| ToolBindingSection {
            name: name.to_string(),
            query_suffix: suffix.map(String::from),
            essential: false,
        }),
    }
}

/// 内置六个领域（顺序即优先级）
fn default_domains() -> Vec<DomainSection> {
    vec![
        domain(
            "jobs",
            &["job", "jobs", "career", "careers", "hiring", "resume", "interview", "salary", "recruiter"],
            "💼 Searching for job opportunities...",
            "You are a Career & Talent Acquisition Specialist. Help users find jobs, improve \
             resumes and navigate their careers. Do not invent job postings: only use the \
             provided search results. If the query is not about jobs or careers, say so.",
            "Job Search",
            Some(("job_search", None)),
        ),
        domain(
            "finance",
            &["stock", "stocks", "invest", "investment", "finance", "financial", "crypto", "budget", "market", "portfolio"],
            "💰 Analyzing financial information...",
            "You are a financial advisor. Provide balanced, informative financial guidance \
             based on the query and context. Include disclaimers as appropriate.",
            "Financial Query",
            Some(("news_search", Some("financial news"))),
        ),
        domain(
            "travel",
            &["travel", "trip", "flight", "flights", "hotel", "hotels", "vacation", "itinerary", "visa"],
            "✈️ Searching for travel options...",
            "You are a travel expert. Help plan the user's trip with flight and hotel tips, \
             best times to visit, budget estimates and local recommendations.",
            "Travel Interest",
            None,
        ),
        domain(
            "shopping",
            &["buy", "shop", "shopping", "product", "products", "price", "deal", "deals", "review"],
            "🛍️ Finding product recommendations...",
            "You are a shopping assistant. Recommend products with pros and cons and budget \
             considerations.",
            "Shopping Interest",
            Some(("product_search", Some("products reviews"))),
        ),
        domain(
            "recipes",
            &["recipe", "recipes", "cook", "cooking", "bake", "dinner", "ingredients", "meal"],
            "👨‍🍳 Finding recipes for you...",
            "You are a culinary expert and recipe guide. Give ingredients with quantities, \
             step-by-step instructions, cooking time, difficulty and dietary substitutions.",
            "Recipe Interest",
            Some(("recipe_search", None)),
        ),
        domain(
            "research",
            &["research", "paper", "papers", "study", "science", "arxiv", "theory"],
            "🔍 Searching for research information...",
            "You are an Academic Research Scientist. Provide deep, technical and accurate \
             information, prioritizing peer-reviewed papers and official reports. Give \
             specific titles, dates or theories where possible.",
            "Researched",
            Some(("news_search", None)),
        ),
    ]
}

impl AppConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_secs(self.orchestrator.deadline_secs)
    }

    /// 启动时校验：领域非空且唯一、兜底领域已注册、子调用超时严格小于请求截止时间
    pub fn validate(&self) -> Result<(), ConciergeError> {
        if self.routing.domains.is_empty() {
            return Err(ConciergeError::Configuration(
                "routing.domains must not be empty".to_string(),
            ));
        }
        let mut seen = HashSet::new();
        for d in &self.routing.domains {
            let name = d.name.trim().to_lowercase();
            if name.is_empty() {
                return Err(ConciergeError::Configuration(
                    "domain name must not be empty".to_string(),
                ));
            }
            if !seen.insert(name.clone()) {
                return Err(ConciergeError::Configuration(format!(
                    "duplicate domain: {}",
                    name
                )));
            }
        }
        let fallback = self.routing.fallback.trim().to_lowercase();
        if !seen.contains(&fallback) {
            return Err(ConciergeError::Configuration(format!(
                "fallback domain '{}' is not in routing.domains",
                self.routing.fallback
            )));
        }

        let deadline = self.deadline();
        let sub_calls = [
            ("classifier.timeout_ms", Duration::from_millis(self.classifier.timeout_ms)),
            (
                "orchestrator.classify_timeout_ms",
                Duration::from_millis(self.orchestrator.classify_timeout_ms),
            ),
            ("memory.query_timeout_ms", Duration::from_millis(self.memory.query_timeout_ms)),
            ("tools.tool_timeout_secs", Duration::from_secs(self.tools.tool_timeout_secs)),
        ];
        for (key, timeout) in sub_calls {
            if timeout.is_zero() || timeout >= deadline {
                return Err(ConciergeError::Configuration(format!(
                    "{} ({:?}) must be non-zero and shorter than orchestrator.deadline_secs ({:?})",
                    key, timeout, deadline
                )));
            }
        }
        if self.orchestrator.relay_buffer == 0 {
            return Err(ConciergeError::Configuration(
                "orchestrator.relay_buffer must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// 从 config 目录加载配置，环境变量 CONCIERGE__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 CONCIERGE__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!("Config file {} not found, ignoring", path.display());
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("CONCIERGE")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.routing.domains.len(), 6);
        assert_eq!(cfg.routing.fallback, "research");
    }

    #[test]
    fn test_fallback_must_be_registered() {
        let mut cfg = AppConfig::default();
        cfg.routing.fallback = "weather".to_string();
        let err = cfg.validate().unwrap_err();
        assert!(matches!(err, ConciergeError::Configuration(msg) if msg.contains("weather")));
    }

    #[test]
    fn test_duplicate_domains_rejected() {
        let mut cfg = AppConfig::default();
        let dup = cfg.routing.domains[0].clone();
        cfg.routing.domains.push(dup);
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_sub_call_timeout_must_be_shorter_than_deadline() {
        let mut cfg = AppConfig::default();
        cfg.orchestrator.deadline_secs = 10;
        cfg.tools.tool_timeout_secs = 10;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("tools.tool_timeout_secs"));

        let mut cfg = AppConfig::default();
        cfg.orchestrator.deadline_secs = 2;
        cfg.classifier.timeout_ms = 2_500;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(
            &path,
            r#"
[routing]
fallback = "general"

[[routing.domains]]
name = "general"
keywords = ["hello"]

[[routing.domains]]
name = "jobs"
keywords = ["job", "jobs", "career"]

[orchestrator]
deadline_secs = 30
"#,
        )
        .unwrap();

        let cfg = load_config(Some(path)).unwrap();
        assert_eq!(cfg.routing.domains.len(), 2);
        assert_eq!(cfg.routing.domains[1].name, "jobs");
        assert_eq!(cfg.routing.fallback, "general");
        assert_eq!(cfg.orchestrator.deadline_secs, 30);
        assert_eq!(cfg.memory.query_limit, 5);
        assert!(cfg.validate().is_ok());
    }
}

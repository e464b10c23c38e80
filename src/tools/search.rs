//! Web 搜索工具：SerpApi 兼容端点
//!
//! 一个 WebSearchTool 对应一种搜索类别（新闻 / 职位 / 菜谱 / 商品），工具名即类别名。
//! 未配置 API Key 时执行直接失败（由响应器按 essential 决定是否降级）；
//! 结果整理为每条一行的文本，超过 max_result_chars 时截断并追加 ...[truncated]。

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;

use crate::config::SearchSection;
use crate::tools::{Tool, ToolRegistry};

/// 搜索类别：决定 SerpApi engine 参数与结果字段
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchKind {
    News,
    Jobs,
    Recipes,
    Products,
}

impl SearchKind {
    pub const ALL: [SearchKind; 4] = [
        SearchKind::News,
        SearchKind::Jobs,
        SearchKind::Recipes,
        SearchKind::Products,
    ];

    pub fn tool_name(self) -> &'static str {
        match self {
            SearchKind::News => "news_search",
            SearchKind::Jobs => "job_search",
            SearchKind::Recipes => "recipe_search",
            SearchKind::Products => "product_search",
        }
    }

    fn description(self) -> &'static str {
        match self {
            SearchKind::News => "Search recent news articles. Args: {\"query\": \"...\"}.",
            SearchKind::Jobs => "Search job listings. Args: {\"query\": \"...\"}.",
            SearchKind::Recipes => "Search recipes. Args: {\"query\": \"...\"}.",
            SearchKind::Products => "Search products and prices. Args: {\"query\": \"...\"}.",
        }
    }

    /// (engine, 额外参数)
    fn engine(self) -> (&'static str, Option<(&'static str, &'static str)>) {
        match self {
            SearchKind::News => ("google", Some(("tbm", "nws"))),
            SearchKind::Jobs => ("google_jobs", None),
            SearchKind::Recipes => ("google", None),
            SearchKind::Products => ("google_shopping", None),
        }
    }

    fn results_key(self) -> &'static str {
        match self {
            SearchKind::News => "news_results",
            SearchKind::Jobs => "jobs_results",
            SearchKind::Recipes => "recipes_results",
            SearchKind::Products => "shopping_results",
        }
    }
}

pub struct WebSearchTool {
    kind: SearchKind,
    client: Client,
    base_url: String,
    api_key: Option<String>,
    results: usize,
    max_result_chars: usize,
}

impl WebSearchTool {
    pub fn new(kind: SearchKind, section: &SearchSection, timeout: Duration) -> Self {
        let api_key = std::env::var(&section.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("concierge/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self {
            kind,
            client,
            base_url: section.base_url.clone(),
            api_key,
            results: section.results,
            max_result_chars: section.max_result_chars,
        }
    }

    pub fn with_api_key(mut self, api_key: Option<String>) -> Self {
        self.api_key = api_key;
        self
    }

    pub fn kind(&self) -> SearchKind {
        self.kind
    }

    async fn search(&self, query: &str) -> Result<String, String> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| "search API key not configured".to_string())?;
        let (engine, extra) = self.kind.engine();
        let num = self.results.to_string();
        let mut params: Vec<(&str, &str)> = vec![
            ("engine", engine),
            ("q", query),
            ("api_key", api_key),
            ("num", num.as_str()),
        ];
        if let Some(kv) = extra {
            params.push(kv);
        }

        let resp = self
            .client
            .get(&self.base_url)
            .query(&params)
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;
        if !resp.status().is_success() {
            return Err(format!("HTTP {}", resp.status()));
        }
        let body: Value = resp
            .json()
            .await
            .map_err(|e| format!("Invalid JSON: {}", e))?;
        if let Some(err) = body.get("error").and_then(|v| v.as_str()) {
            return Err(err.to_string());
        }
        Ok(truncate(
            &format_results(self.kind, &body, self.results),
            self.max_result_chars,
        ))
    }
}

fn field<'a>(item: &'a Value, key: &str) -> &'a str {
    item.get(key).and_then(|v| v.as_str()).unwrap_or("")
}

/// 把搜索结果整理成每条一行的文本
pub(crate) fn format_results(kind: SearchKind, body: &Value, limit: usize) -> String {
    let items = body
        .get(kind.results_key())
        .and_then(|v| v.as_array())
        .map(|a| a.as_slice())
        .unwrap_or(&[]);
    if items.is_empty() {
        return "No results found.".to_string();
    }
    items
        .iter()
        .take(limit)
        .map(|item| {
            let title = field(item, "title");
            match kind {
                SearchKind::News => format!("- {}: {}", title, field(item, "snippet")),
                SearchKind::Jobs => format!(
                    "- {} at {} ({})",
                    title,
                    field(item, "company_name"),
                    field(item, "location")
                ),
                SearchKind::Recipes => format!("- {} ({})", title, field(item, "source")),
                SearchKind::Products => {
                    format!("- {} [{}] {}", title, field(item, "price"), field(item, "source"))
                }
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        text.chars().take(max_chars).collect::<String>() + "\n...[truncated]"
    } else {
        text.to_string()
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        self.kind.tool_name()
    }

    fn description(&self) -> &str {
        self.kind.description()
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let query = args
            .get("query")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .trim();
        if query.is_empty() {
            return Err("Missing query".to_string());
        }
        tracing::info!(tool = %self.name(), query = %query, "web search");
        self.search(query).await
    }
}

/// 注册全部搜索类别
pub fn register_search_tools(registry: &mut ToolRegistry, section: &SearchSection, timeout: Duration) {
    for kind in SearchKind::ALL {
        registry.register(WebSearchTool::new(kind, section, timeout));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_format_news_results() {
        let body = json!({
            "news_results": [
                {"title": "Rates hold", "snippet": "Central bank pauses"},
                {"title": "Markets rally", "snippet": "Stocks up"},
                {"title": "Third", "snippet": "cut by limit"}
            ]
        });
        let text = format_results(SearchKind::News, &body, 2);
        assert_eq!(text, "- Rates hold: Central bank pauses\n- Markets rally: Stocks up");
    }

    #[test]
    fn test_format_jobs_and_empty() {
        let body = json!({
            "jobs_results": [{"title": "Rust Engineer", "company_name": "Acme", "location": "Remote"}]
        });
        assert_eq!(
            format_results(SearchKind::Jobs, &body, 5),
            "- Rust Engineer at Acme (Remote)"
        );
        assert_eq!(format_results(SearchKind::Products, &json!({}), 5), "No results found.");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("abcdef", 3), "abc\n...[truncated]");
        assert_eq!(truncate("abc", 3), "abc");
    }

    #[tokio::test]
    async fn test_missing_api_key_fails() {
        let tool = WebSearchTool::new(SearchKind::News, &SearchSection::default(), Duration::from_secs(1))
            .with_api_key(None);
        assert!(!tool.is_configured());
        let err = tool.execute(json!({"query": "rust"})).await.unwrap_err();
        assert!(err.contains("not configured"));
    }
}

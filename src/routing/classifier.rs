//! 意图分类：把请求映射到注册表中的一个领域
//!
//! 第一级关键词匹配（按注册顺序，先命中者胜）；未命中时交给第二级语义分类（带独立超时）。
//! 任何失败都退回兜底领域并附上降级原因，classify 本身从不失败。

use std::sync::Arc;
use std::time::Duration;

use crate::config::ClassifierSection;
use crate::core::{ConciergeError, Request};
use crate::memory::recent_turns;
use crate::memory::tokenizer::{contains_cjk, tokenize};
use crate::routing::{
    normalize_answer, Domain, DomainRegistry, RoutingDecision, RoutingTier, SemanticClassifier,
};

/// 一个关键词（可能是多词短语）
#[derive(Debug, Clone)]
struct Keyword {
    raw: String,
    tokens: Vec<String>,
}

impl Keyword {
    fn new(raw: &str) -> Option<Self> {
        let raw = raw.trim().to_lowercase();
        let tokens = tokenize(&raw);
        if tokens.is_empty() {
            return None;
        }
        Some(Self { raw, tokens })
    }

    /// 多词短语须以连续 token 序列出现；中文短语按子串匹配
    fn matches(&self, lowered: &str, tokens: &[String]) -> bool {
        if contains_cjk(&self.raw) {
            return lowered.contains(&self.raw);
        }
        let n = self.tokens.len();
        n <= tokens.len() && tokens.windows(n).any(|w| w == self.tokens.as_slice())
    }
}

pub struct Classifier {
    table: Vec<(Domain, Vec<Keyword>)>,
    domains: Vec<Domain>,
    fallback: Domain,
    semantic: Option<Arc<dyn SemanticClassifier>>,
    semantic_timeout: Duration,
    history_turns: usize,
}

impl Classifier {
    /// 关键词表取自注册表（保持注册顺序）
    pub fn new(registry: &DomainRegistry, config: &ClassifierSection) -> Self {
        let table = registry
            .entries()
            .map(|e| {
                let keywords = e.keywords.iter().filter_map(|k| Keyword::new(k)).collect();
                (e.domain.clone(), keywords)
            })
            .collect();
        Self {
            table,
            domains: registry.list().to_vec(),
            fallback: registry.fallback().clone(),
            semantic: None,
            semantic_timeout: Duration::from_millis(config.timeout_ms),
            history_turns: config.history_turns,
        }
    }

    pub fn with_semantic(mut self, semantic: Arc<dyn SemanticClassifier>) -> Self {
        self.semantic = Some(semantic);
        self
    }

    pub fn domains(&self) -> &[Domain] {
        &self.domains
    }

    pub fn fallback(&self) -> &Domain {
        &self.fallback
    }

    /// 第一级：返回 (领域, 命中的关键词)
    pub fn keyword_match(&self, message: &str) -> Option<(Domain, String)> {
        let lowered = message.to_lowercase();
        let tokens = tokenize(&lowered);
        self.table.iter().find_map(|(domain, keywords)| {
            keywords
                .iter()
                .find(|k| k.matches(&lowered, &tokens))
                .map(|k| (domain.clone(), k.raw.clone()))
        })
    }

    /// 兜底决策；reason 非空时标记为降级
    pub fn fallback_decision(&self, rationale: &str, reason: Option<String>) -> RoutingDecision {
        let decision = RoutingDecision::new(self.fallback.clone(), RoutingTier::Fallback, rationale);
        match reason {
            Some(reason) => {
                tracing::warn!(
                    domain = %self.fallback,
                    reason = %reason,
                    "{}",
                    ConciergeError::ClassificationDegraded(reason.clone())
                );
                decision.degraded(reason)
            }
            None => decision,
        }
    }

    pub async fn classify(&self, request: &Request) -> RoutingDecision {
        let message = request.message.trim();
        if message.is_empty() {
            return self.fallback_decision("empty message", None);
        }

        if let Some((domain, keyword)) = self.keyword_match(message) {
            return RoutingDecision::new(
                domain,
                RoutingTier::Keyword,
                format!("matched keyword '{}'", keyword),
            );
        }

        let Some(semantic) = &self.semantic else {
            return self.fallback_decision("no keyword matched", None);
        };

        let turns = recent_turns(&request.history, self.history_turns);
        let outcome = tokio::time::timeout(
            self.semantic_timeout,
            semantic.classify_one_of(message, turns, &self.domains),
        )
        .await;

        match outcome {
            Ok(Ok(name)) => {
                let name = normalize_answer(&name);
                let domain = Domain::new(&name);
                if self.domains.contains(&domain) {
                    RoutingDecision::new(
                        domain,
                        RoutingTier::Semantic,
                        format!("semantic classifier chose '{}'", name),
                    )
                } else {
                    self.fallback_decision(
                        "no keyword matched",
                        Some(format!("semantic classifier returned unknown domain '{}'", name)),
                    )
                }
            }
            Ok(Err(e)) => self.fallback_decision(
                "no keyword matched",
                Some(format!("semantic classifier failed: {}", e)),
            ),
            Err(_) => self.fallback_decision(
                "no keyword matched",
                Some(format!(
                    "semantic classifier timed out after {:?}",
                    self.semantic_timeout
                )),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Fragment;
    use crate::memory::Message;
    use crate::responders::{fragment_stream, FragmentStream, Responder};
    use crate::routing::DomainEntry;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use tokio_util::sync::CancellationToken;

    struct Stub;

    impl Responder for Stub {
        fn stream(&self, _r: Arc<Request>, _m: Vec<String>, c: CancellationToken) -> FragmentStream {
            fragment_stream(c, |sink| async move { sink.emit(Fragment::content("ok")).await })
        }
    }

    enum Script {
        Answer(&'static str),
        Fail,
        Hang,
    }

    struct ScriptedSemantic {
        script: Script,
        seen_turns: Mutex<usize>,
    }

    #[async_trait]
    impl SemanticClassifier for ScriptedSemantic {
        async fn classify_one_of(
            &self,
            _message: &str,
            recent_turns: &[Message],
            _domains: &[Domain],
        ) -> Result<String, String> {
            *self.seen_turns.lock().unwrap() = recent_turns.len();
            match self.script {
                Script::Answer(a) => Ok(a.to_string()),
                Script::Fail => Err("provider down".to_string()),
                Script::Hang => {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok("jobs".to_string())
                }
            }
        }
    }

    fn registry() -> DomainRegistry {
        DomainRegistry::new(
            vec![
                DomainEntry::new("jobs", Arc::new(Stub)).with_keywords(["job", "jobs", "career"]),
                DomainEntry::new("finance", Arc::new(Stub))
                    .with_keywords(["stock", "index fund", "股票"]),
                DomainEntry::new("travel", Arc::new(Stub)).with_keywords(["trip", "flight"]),
                DomainEntry::new("research", Arc::new(Stub)).with_keywords(["paper"]),
            ],
            "research",
        )
        .unwrap()
    }

    fn config() -> ClassifierSection {
        ClassifierSection {
            semantic: true,
            timeout_ms: 50,
            history_turns: 2,
        }
    }

    fn with_script(script: Script) -> (Classifier, Arc<ScriptedSemantic>) {
        let semantic = Arc::new(ScriptedSemantic {
            script,
            seen_turns: Mutex::new(0),
        });
        let c = Classifier::new(&registry(), &config()).with_semantic(semantic.clone());
        (c, semantic)
    }

    #[tokio::test]
    async fn test_keyword_match_routes_jobs() {
        let (c, _) = with_script(Script::Fail);
        let d = c.classify(&Request::new("u", "Find remote Python jobs")).await;
        assert_eq!(d.domain, Domain::new("jobs"));
        assert_eq!(d.tier, RoutingTier::Keyword);
        assert!(!d.is_degraded());
    }

    #[tokio::test]
    async fn test_registry_order_breaks_ties() {
        let (c, _) = with_script(Script::Fail);
        let d = c
            .classify(&Request::new("u", "Should I book a flight for a job interview?"))
            .await;
        assert_eq!(d.domain, Domain::new("jobs"));
    }

    #[tokio::test]
    async fn test_multi_word_keyword_needs_contiguous_tokens() {
        let (c, _) = with_script(Script::Answer("travel"));
        assert_eq!(
            c.keyword_match("is an index fund safe").map(|(d, _)| d),
            Some(Domain::new("finance"))
        );
        assert!(c.keyword_match("fund the index").is_none());
        assert_eq!(
            c.keyword_match("这只股票怎么样").map(|(d, _)| d),
            Some(Domain::new("finance"))
        );
    }

    #[tokio::test]
    async fn test_empty_message_falls_back() {
        let (c, _) = with_script(Script::Answer("jobs"));
        let d = c.classify(&Request::new("u", "   ")).await;
        assert_eq!(d.domain, Domain::new("research"));
        assert_eq!(d.tier, RoutingTier::Fallback);
    }

    #[tokio::test]
    async fn test_semantic_tier_uses_recent_turns_only() {
        let (c, semantic) = with_script(Script::Answer("Travel."));
        let req = Request::new("u", "somewhere warm in december").with_history(vec![
            Message::user("a"),
            Message::assistant("b"),
            Message::user("c"),
        ]);
        let d = c.classify(&req).await;
        assert_eq!(d.domain, Domain::new("travel"));
        assert_eq!(d.tier, RoutingTier::Semantic);
        assert_eq!(*semantic.seen_turns.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_semantic_failures_degrade_to_fallback() {
        for script in [Script::Fail, Script::Hang, Script::Answer("weather")] {
            let (c, _) = with_script(script);
            let d = c.classify(&Request::new("u", "hello there")).await;
            assert_eq!(d.domain, Domain::new("research"));
            assert!(d.is_degraded());
        }
    }

    #[tokio::test]
    async fn test_without_semantic_tier_falls_back_cleanly() {
        let c = Classifier::new(&registry(), &config());
        let d = c.classify(&Request::new("u", "hello there")).await;
        assert_eq!(d.domain, Domain::new("research"));
        assert!(!d.is_degraded());
    }
}

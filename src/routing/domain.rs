//! 领域标识与路由结果

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

/// 领域名（小写，构造后不可变，克隆廉价）
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Domain(Arc<str>);

impl Domain {
    pub fn new(name: &str) -> Self {
        Self(Arc::from(name.trim().to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Domain {
    fn from(s: &str) -> Self {
        Domain::new(s)
    }
}

impl Serialize for Domain {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

/// 路由依据
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingTier {
    Keyword,
    Semantic,
    Fallback,
}

impl fmt::Display for RoutingTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoutingTier::Keyword => write!(f, "keyword"),
            RoutingTier::Semantic => write!(f, "semantic"),
            RoutingTier::Fallback => write!(f, "fallback"),
        }
    }
}

/// 一次分类的结果
#[derive(Debug, Clone, Serialize)]
pub struct RoutingDecision {
    pub domain: Domain,
    /// 人类可读的理由（不参与逻辑）
    pub rationale: String,
    pub tier: RoutingTier,
    /// 分类降级原因（语义分类失败、超时、结果不在集合内）
    pub degraded: Option<String>,
    pub decided_at: DateTime<Utc>,
}

impl RoutingDecision {
    pub fn new(domain: Domain, tier: RoutingTier, rationale: impl Into<String>) -> Self {
        Self {
            domain,
            rationale: rationale.into(),
            tier,
            degraded: None,
            decided_at: Utc::now(),
        }
    }

    pub fn degraded(mut self, reason: impl Into<String>) -> Self {
        self.degraded = Some(reason.into());
        self
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_is_normalized() {
        assert_eq!(Domain::new("  Jobs "), Domain::from("jobs"));
        assert_eq!(Domain::new("Travel").to_string(), "travel");
    }

    #[test]
    fn test_decision_serializes_flat() {
        let d = RoutingDecision::new(Domain::new("jobs"), RoutingTier::Keyword, "matched 'jobs'");
        let v = serde_json::to_value(&d).unwrap();
        assert_eq!(v["domain"], "jobs");
        assert_eq!(v["tier"], "keyword");
        assert!(v["degraded"].is_null());
    }
}

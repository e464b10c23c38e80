//! 领域注册表
//!
//! 启动时构建一次，之后只读：HashMap 负责查找，Vec 保留配置顺序（关键词匹配的优先级）。

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;

use crate::core::ConciergeError;
use crate::responders::{Dependency, Responder};
use crate::routing::Domain;

/// 注册表中的一项
pub struct DomainEntry {
    pub domain: Domain,
    pub keywords: Vec<String>,
    /// 写入长期记忆时的摘要前缀
    pub memory_label: String,
    pub responder: Arc<dyn Responder>,
}

impl DomainEntry {
    pub fn new(name: &str, responder: Arc<dyn Responder>) -> Self {
        Self {
            domain: Domain::new(name),
            keywords: Vec::new(),
            memory_label: name.to_string(),
            responder,
        }
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_memory_label(mut self, label: impl Into<String>) -> Self {
        self.memory_label = label.into();
        self
    }
}

/// 单个领域的健康状况
#[derive(Debug, Clone, Serialize)]
pub struct DomainHealth {
    pub domain: Domain,
    pub ready: bool,
    pub fallback: bool,
    pub dependencies: Vec<Dependency>,
}

pub struct DomainRegistry {
    order: Vec<Domain>,
    entries: HashMap<Domain, DomainEntry>,
    fallback: Domain,
}

impl DomainRegistry {
    /// 校验：领域非空、名称唯一、兜底领域已注册
    pub fn new(entries: Vec<DomainEntry>, fallback: &str) -> Result<Self, ConciergeError> {
        if entries.is_empty() {
            return Err(ConciergeError::Configuration(
                "domain registry must not be empty".to_string(),
            ));
        }
        let mut order = Vec::with_capacity(entries.len());
        let mut map = HashMap::with_capacity(entries.len());
        for entry in entries {
            if entry.domain.as_str().is_empty() {
                return Err(ConciergeError::Configuration(
                    "domain name must not be empty".to_string(),
                ));
            }
            let domain = entry.domain.clone();
            if map.insert(domain.clone(), entry).is_some() {
                return Err(ConciergeError::Configuration(format!(
                    "duplicate domain: {}",
                    domain
                )));
            }
            order.push(domain);
        }
        let fallback = Domain::new(fallback);
        if !map.contains_key(&fallback) {
            return Err(ConciergeError::Configuration(format!(
                "fallback domain '{}' is not registered",
                fallback
            )));
        }
        Ok(Self {
            order,
            entries: map,
            fallback,
        })
    }

    pub fn resolve(&self, domain: &Domain) -> Result<Arc<dyn Responder>, ConciergeError> {
        self.entries
            .get(domain)
            .map(|e| Arc::clone(&e.responder))
            .ok_or_else(|| {
                ConciergeError::Configuration(format!("no responder registered for domain '{}'", domain))
            })
    }

    /// 配置顺序的领域列表
    pub fn list(&self) -> &[Domain] {
        &self.order
    }

    pub fn entry(&self, domain: &Domain) -> Option<&DomainEntry> {
        self.entries.get(domain)
    }

    /// 按配置顺序遍历
    pub fn entries(&self) -> impl Iterator<Item = &DomainEntry> {
        self.order.iter().filter_map(|d| self.entries.get(d))
    }

    pub fn contains(&self, domain: &Domain) -> bool {
        self.entries.contains_key(domain)
    }

    pub fn fallback(&self) -> &Domain {
        &self.fallback
    }

    pub fn memory_label(&self, domain: &Domain) -> String {
        self.entries
            .get(domain)
            .map(|e| e.memory_label.clone())
            .unwrap_or_else(|| domain.to_string())
    }

    /// 每个领域的依赖就绪情况；essential 依赖全部就绪才算 ready
    pub fn health(&self) -> Vec<DomainHealth> {
        self.entries()
            .map(|e| {
                let dependencies = e.responder.dependencies();
                let ready = dependencies.iter().all(|d| d.ready || !d.essential);
                DomainHealth {
                    domain: e.domain.clone(),
                    ready,
                    fallback: e.domain == self.fallback,
                    dependencies,
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Fragment, Request};
    use crate::responders::{fragment_stream, FragmentStream};
    use tokio_util::sync::CancellationToken;

    struct Stub;

    impl Responder for Stub {
        fn stream(&self, _r: Arc<Request>, _m: Vec<String>, c: CancellationToken) -> FragmentStream {
            fragment_stream(c, |sink| async move { sink.emit(Fragment::content("ok")).await })
        }

        fn dependencies(&self) -> Vec<Dependency> {
            vec![Dependency {
                name: "tool:x".to_string(),
                ready: false,
                essential: false,
            }]
        }
    }

    fn entry(name: &str) -> DomainEntry {
        DomainEntry::new(name, Arc::new(Stub))
    }

    #[test]
    fn test_resolve_and_order() {
        let reg = DomainRegistry::new(vec![entry("jobs"), entry("travel")], "travel").unwrap();
        assert_eq!(reg.list(), &[Domain::new("jobs"), Domain::new("travel")]);
        assert!(reg.resolve(&Domain::new("jobs")).is_ok());
        let err = reg.resolve(&Domain::new("weather")).err().unwrap();
        assert!(matches!(err, ConciergeError::Configuration(_)));
    }

    #[test]
    fn test_construction_validation() {
        assert!(DomainRegistry::new(vec![], "jobs").is_err());
        assert!(DomainRegistry::new(vec![entry("jobs"), entry("Jobs")], "jobs").is_err());
        assert!(DomainRegistry::new(vec![entry("jobs")], "travel").is_err());
    }

    #[test]
    fn test_health_ignores_non_essential() {
        let reg = DomainRegistry::new(vec![entry("jobs")], "jobs").unwrap();
        let health = reg.health();
        assert!(health[0].ready);
        assert!(health[0].fallback);
    }
}

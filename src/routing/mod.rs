//! 路由层：领域注册表与两级意图分类

pub mod classifier;
pub mod domain;
pub mod registry;
pub mod semantic;

pub use classifier::Classifier;
pub use domain::{Domain, RoutingDecision, RoutingTier};
pub use registry::{DomainEntry, DomainHealth, DomainRegistry};
pub use semantic::{normalize_answer, LlmSemanticClassifier, SemanticClassifier};

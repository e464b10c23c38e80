//! Concierge - 多领域智能助手编排核心
//!
//! 模块划分：
//! - **config**: 应用配置加载（内置默认值 + TOML + 环境变量）
//! - **core**: 编排器（分类 → 分派 → 流式转发 → 记忆写入）、请求状态机、取消监管、错误分类
//! - **routing**: 领域注册表与两级意图分类器（关键词匹配 + LLM 语义分类）
//! - **responders**: 领域响应器（流式产出 Fragment）
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / Mock）
//! - **memory**: 长期记忆网关（内存 / JSONL 文件 / 关闭）与对话消息
//! - **tools**: 工具箱（Web 搜索）与带超时的执行器
//! - **observability**: 日志初始化

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod responders;
pub mod routing;
pub mod tools;

pub use crate::core::{
    create_orchestrator, Orchestrator, Request, RequestHandle, RequestOutcome, StreamEvent,
};
pub use crate::routing::{Classifier, Domain, DomainRegistry, RoutingDecision};

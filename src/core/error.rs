//! 错误分类
//!
//! 只有「分类结果与注册表不一致」、响应器终止性失败与取消会让请求进入 Failed；
//! 分类降级、工具失败、记忆写入失败都在各自层内消化。

use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// 编排过程中可能出现的错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConciergeError {
    /// 分类失败后退回兜底领域（非致命，仅记录日志）
    #[error("Classification degraded: {0}")]
    ClassificationDegraded(String),

    /// 领域未注册等配置问题：请求级致命，不可重试
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// 工具调用失败或超时：由响应器降级为部分回答
    #[error("Tool {tool} failed: {reason}")]
    ToolFailure { tool: String, reason: String },

    #[error("Stream cancelled: {0}")]
    StreamCancelled(CancelReason),

    /// 记忆写入失败：只进日志，不影响请求结果
    #[error("Memory write failed: {0}")]
    MemoryWriteFailure(String),

    /// 响应器内部不可恢复的错误（如 LLM 调用失败）
    #[error("Responder error: {0}")]
    Responder(String),
}

/// 取消原因
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// 调用方主动取消（或断开连接）
    Caller,
    /// 请求截止时间到期
    Deadline,
    /// 进程关闭，所有在途请求一并取消
    Shutdown,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Caller => write!(f, "cancelled by caller"),
            CancelReason::Deadline => write!(f, "deadline exceeded"),
            CancelReason::Shutdown => write!(f, "service shutting down"),
        }
    }
}

/// 终止性失败的类别（随 error 事件下发给调用方）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Configuration,
    Responder,
    Cancelled,
}

impl ConciergeError {
    /// 是否终止整个请求
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ConciergeError::Configuration(_)
                | ConciergeError::StreamCancelled(_)
                | ConciergeError::Responder(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_classification() {
        assert!(ConciergeError::Configuration("x".into()).is_terminal());
        assert!(ConciergeError::StreamCancelled(CancelReason::Deadline).is_terminal());
        assert!(!ConciergeError::ClassificationDegraded("x".into()).is_terminal());
        assert!(!ConciergeError::MemoryWriteFailure("x".into()).is_terminal());
        assert!(!ConciergeError::ToolFailure {
            tool: "job_search".into(),
            reason: "timeout".into()
        }
        .is_terminal());
    }

    #[test]
    fn test_display_messages() {
        let err = ConciergeError::StreamCancelled(CancelReason::Deadline);
        assert_eq!(err.to_string(), "Stream cancelled: deadline exceeded");
        let err = ConciergeError::StreamCancelled(CancelReason::Shutdown);
        assert_eq!(err.to_string(), "Stream cancelled: service shutting down");
        let err = ConciergeError::ToolFailure {
            tool: "news_search".into(),
            reason: "HTTP 500".into(),
        };
        assert_eq!(err.to_string(), "Tool news_search failed: HTTP 500");
    }
}

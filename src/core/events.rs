//! 流式事件：响应器产出的 Fragment 与下发给调用方的 StreamEvent
//!
//! 调用方收到的事件序列总以且仅以一个终止事件（done / error / cancelled）结束，
//! 不需要靠连接关闭来推断完成。

use serde::Serialize;

use crate::core::error::{CancelReason, FailureKind};

/// 响应器产出的最小输出单元
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Fragment {
    /// 进度提示（如 "Searching for job opportunities..."）
    Status { text: String },
    /// 回答正文的一小段
    Content { text: String },
    /// 错误；recoverable 为 true 时回答仍会继续（如工具失败后的部分回答）
    Error { message: String, recoverable: bool },
    /// 响应器观察到取消后的最后一个片段
    Cancelled,
}

impl Fragment {
    pub fn status(text: impl Into<String>) -> Self {
        Fragment::Status { text: text.into() }
    }

    pub fn content(text: impl Into<String>) -> Self {
        Fragment::Content { text: text.into() }
    }

    /// 可恢复错误：流继续
    pub fn warning(message: impl Into<String>) -> Self {
        Fragment::Error {
            message: message.into(),
            recoverable: true,
        }
    }

    /// 终止性错误：响应器随后停止产出
    pub fn fatal(message: impl Into<String>) -> Self {
        Fragment::Error {
            message: message.into(),
            recoverable: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Fragment::Error {
                recoverable: false,
                ..
            } | Fragment::Cancelled
        )
    }
}

/// 下发给调用方的事件（可序列化为 JSON 供 SSE 推送）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    Status { text: String },
    Content { text: String },
    /// 非终止的工具错误（回答会继续）
    ToolError { message: String },
    /// 正常完成
    Done { fragments: usize, domain: String },
    /// 终止性失败
    Error { kind: FailureKind, message: String },
    /// 调用方取消或截止时间到期
    Cancelled { reason: CancelReason },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            StreamEvent::Done { .. } | StreamEvent::Error { .. } | StreamEvent::Cancelled { .. }
        )
    }

    /// 非终止片段原样映射为事件；终止片段由编排器决定如何收尾，返回 None
    pub fn relay(fragment: Fragment) -> Option<Self> {
        match fragment {
            Fragment::Status { text } => Some(StreamEvent::Status { text }),
            Fragment::Content { text } => Some(StreamEvent::Content { text }),
            Fragment::Error {
                message,
                recoverable: true,
            } => Some(StreamEvent::ToolError { message }),
            Fragment::Error {
                recoverable: false, ..
            }
            | Fragment::Cancelled => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fragment_terminal_flags() {
        assert!(!Fragment::status("x").is_terminal());
        assert!(!Fragment::warning("tool down").is_terminal());
        assert!(Fragment::fatal("llm down").is_terminal());
        assert!(Fragment::Cancelled.is_terminal());
    }

    #[test]
    fn test_relay_keeps_content_verbatim() {
        let ev = StreamEvent::relay(Fragment::content("  raw *text*\n")).unwrap();
        assert_eq!(
            ev,
            StreamEvent::Content {
                text: "  raw *text*\n".to_string()
            }
        );
        assert!(StreamEvent::relay(Fragment::Cancelled).is_none());
        assert!(StreamEvent::relay(Fragment::fatal("boom")).is_none());
    }

    #[test]
    fn test_event_json_shape() {
        let done = StreamEvent::Done {
            fragments: 3,
            domain: "jobs".to_string(),
        };
        let json = serde_json::to_value(&done).unwrap();
        assert_eq!(json["type"], "done");
        assert_eq!(json["domain"], "jobs");
        assert_eq!(json["fragments"], 3);

        let cancelled = StreamEvent::Cancelled {
            reason: CancelReason::Deadline,
        };
        let json = serde_json::to_string(&cancelled).unwrap();
        assert_eq!(json, r#"{"type":"cancelled","reason":"deadline"}"#);
    }
}

//! 请求状态机
//!
//! Received → Classifying → Dispatching → Streaming → Completed | Failed。
//! 任何非终止阶段都可以直接进入 Failed（取消、截止时间）；其余跳转一律拒绝。

use serde::Serialize;

/// 单个请求所处阶段
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestPhase {
    Received,
    Classifying,
    Dispatching,
    Streaming,
    Completed,
    Failed,
}

impl RequestPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestPhase::Completed | RequestPhase::Failed)
    }

    /// 是否允许从 self 跳转到 next
    pub fn can_transition_to(self, next: RequestPhase) -> bool {
        use RequestPhase::*;
        match (self, next) {
            (Received, Classifying) => true,
            (Classifying, Dispatching) => true,
            (Dispatching, Streaming) => true,
            (Streaming, Completed) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// 请求生命周期：记录阶段并拒绝非法跳转
#[derive(Debug)]
pub struct RequestLifecycle {
    request_id: String,
    phase: RequestPhase,
}

impl RequestLifecycle {
    pub fn new(request_id: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            phase: RequestPhase::Received,
        }
    }

    pub fn phase(&self) -> RequestPhase {
        self.phase
    }

    /// 跳转到 next；非法跳转保持原阶段并返回 false
    pub fn advance(&mut self, next: RequestPhase) -> bool {
        if self.phase.can_transition_to(next) {
            tracing::debug!(request_id = %self.request_id, from = ?self.phase, to = ?next, "phase");
            self.phase = next;
            true
        } else {
            tracing::warn!(
                request_id = %self.request_id,
                from = ?self.phase,
                to = ?next,
                "Rejected illegal phase transition"
            );
            false
        }
    }
}

//! 入站请求
//!
//! 提交后不可变，由编排器在单次处理中独占；每次提交都会分配新的请求 id。

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::memory::Message;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub user_id: String,
    pub message: String,
    /// 之前的对话轮次（按时间顺序）
    #[serde(default)]
    pub history: Vec<Message>,
    #[serde(default)]
    pub session_id: Option<String>,
    /// 覆盖默认截止时间（毫秒）
    #[serde(default)]
    pub deadline_ms: Option<u64>,
}

impl Request {
    pub fn new(user_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            message: message.into(),
            history: Vec::new(),
            session_id: None,
            deadline_ms: None,
        }
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline_ms = Some(deadline.as_millis() as u64);
        self
    }

    /// 本次请求的截止时间：有覆盖值用覆盖值，否则用默认
    pub fn deadline_or(&self, default: Duration) -> Duration {
        self.deadline_ms
            .map(Duration::from_millis)
            .unwrap_or(default)
    }
}

/// 生成新的请求 id
pub fn new_request_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_minimal_request() {
        let req: Request =
            serde_json::from_str(r#"{"user_id":"u1","message":"hello"}"#).unwrap();
        assert!(req.history.is_empty());
        assert_eq!(req.deadline_or(Duration::from_secs(60)), Duration::from_secs(60));
    }

    #[test]
    fn test_deadline_override() {
        let req = Request::new("u", "m").with_deadline(Duration::from_millis(1500));
        assert_eq!(req.deadline_or(Duration::from_secs(60)), Duration::from_millis(1500));
    }

    #[test]
    fn test_request_ids_are_unique() {
        assert_ne!(new_request_id(), new_request_id());
    }
}

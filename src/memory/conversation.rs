//! 对话消息
//!
//! 请求携带的历史轮次与发给 LLM 的消息共用同一结构。

use std::fmt;

use serde::{Deserialize, Serialize};

/// 消息角色（与 LLM API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
        }
    }
}

/// 单条消息
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

/// 取最近 n 条消息（保持原顺序）
pub fn recent_turns(history: &[Message], n: usize) -> &[Message] {
    &history[history.len().saturating_sub(n)..]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_turns_keeps_tail_in_order() {
        let history = vec![
            Message::user("a"),
            Message::assistant("b"),
            Message::user("c"),
        ];
        let tail = recent_turns(&history, 2);
        assert_eq!(tail, &[Message::assistant("b"), Message::user("c")]);
        assert_eq!(recent_turns(&history, 10).len(), 3);
        assert!(recent_turns(&history, 0).is_empty());
    }

    #[test]
    fn test_role_serde_lowercase() {
        let m: Message = serde_json::from_str(r#"{"role":"assistant","content":"hi"}"#).unwrap();
        assert_eq!(m.role, Role::Assistant);
        assert_eq!(serde_json::to_string(&Role::User).unwrap(), r#""user""#);
    }
}

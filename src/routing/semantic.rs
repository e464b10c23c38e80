//! 第二级：语义分类
//!
//! 关键词未命中时调用。LLM 实现只要求回答一个领域名；回答经规范化后由 Classifier 校验是否在集合内。

use std::sync::Arc;

use async_trait::async_trait;

use crate::llm::LlmClient;
use crate::memory::Message;
use crate::routing::Domain;

#[async_trait]
pub trait SemanticClassifier: Send + Sync {
    /// 从 domains 中选出一个名字；失败返回 Err
    async fn classify_one_of(
        &self,
        message: &str,
        recent_turns: &[Message],
        domains: &[Domain],
    ) -> Result<String, String>;
}

/// 规范化模型回答：去空白、小写、剥掉首尾标点与引号
pub fn normalize_answer(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    let first_line = lowered.lines().next().unwrap_or("");
    first_line
        .trim_matches(|c: char| !c.is_alphanumeric())
        .replace(['"', '\'', '`', '*'], "")
}

pub struct LlmSemanticClassifier {
    llm: Arc<dyn LlmClient>,
}

impl LlmSemanticClassifier {
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl SemanticClassifier for LlmSemanticClassifier {
    async fn classify_one_of(
        &self,
        message: &str,
        recent_turns: &[Message],
        domains: &[Domain],
    ) -> Result<String, String> {
        let names: Vec<&str> = domains.iter().map(|d| d.as_str()).collect();
        let system_prompt = format!(
            "You are an intent classifier for a multi-domain assistant.\n\
             Choose exactly one domain for the user's latest message from: {}.\n\
             Output only the domain name, nothing else.",
            names.join(", ")
        );

        let mut user = String::new();
        if !recent_turns.is_empty() {
            user.push_str("Recent conversation:\n");
            for turn in recent_turns {
                user.push_str(&format!("{}: {}\n", turn.role, turn.content));
            }
            user.push('\n');
        }
        user.push_str(&format!("User message: {}", message));

        let response = self
            .llm
            .complete(&[Message::system(system_prompt), Message::user(user)])
            .await?;
        Ok(normalize_answer(&response))
    }
}

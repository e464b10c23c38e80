//! Mock LLM 客户端（用于测试与无 API Key 的本地运行）
//!
//! 默认回显最后一条 User 消息；可脚本化：固定回复、逐 Token 延迟、第 N 个 Token 后失败。

use std::time::Duration;

use async_trait::async_trait;
use futures_util::{stream, StreamExt};

use crate::llm::{LlmClient, TokenStream};
use crate::memory::{Message, Role};

#[derive(Debug, Clone, Default)]
pub struct MockLlmClient {
    reply: Option<String>,
    token_delay: Option<Duration>,
    fail_after: Option<usize>,
    fail_on_start: bool,
}

impl MockLlmClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// 固定回复（按空白切分为多个 Token 流出）
    pub fn with_reply(mut self, reply: impl Into<String>) -> Self {
        self.reply = Some(reply.into());
        self
    }

    pub fn with_token_delay(mut self, delay: Duration) -> Self {
        self.token_delay = Some(delay);
        self
    }

    /// 流出 n 个 Token 后返回错误
    pub fn fail_after(mut self, n: usize) -> Self {
        self.fail_after = Some(n);
        self
    }

    /// 调用即失败（complete 与 complete_stream 均返回 Err）
    pub fn failing(mut self) -> Self {
        self.fail_on_start = true;
        self
    }

    fn answer(&self, messages: &[Message]) -> String {
        if let Some(reply) = &self.reply {
            return reply.clone();
        }
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");
        format!("Mock answer: {}", last_user)
    }
}

/// 按空白切分且保留分隔符，拼接后与原文一致
fn split_tokens(text: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        current.push(ch);
        if ch.is_whitespace() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

#[async_trait]
impl LlmClient for MockLlmClient {
    fn describe(&self) -> String {
        "mock".to_string()
    }

    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        if self.fail_on_start {
            return Err("mock llm unavailable".to_string());
        }
        Ok(self.answer(messages))
    }

    async fn complete_stream(&self, messages: &[Message]) -> Result<TokenStream, String> {
        if self.fail_on_start {
            return Err("mock llm unavailable".to_string());
        }
        let mut items: Vec<Result<String, String>> =
            split_tokens(&self.answer(messages)).into_iter().map(Ok).collect();
        if let Some(n) = self.fail_after {
            items.truncate(n);
            items.push(Err(format!("mock stream failed after {} tokens", n)));
        }
        let delay = self.token_delay;
        Ok(Box::pin(stream::iter(items).then(move |item| async move {
            if let Some(d) = delay {
                tokio::time::sleep(d).await;
            }
            item
        })))
    }
}

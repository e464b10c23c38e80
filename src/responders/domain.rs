//! 通用领域响应器
//!
//! 按画像依次：推送状态提示 → 调用绑定工具（可选）→ 组装 prompt → 流式转出 LLM Token。
//! 每次 emit 之间以及等待工具/LLM 时都会检查取消。

use std::sync::Arc;

use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::core::{Fragment, Request};
use crate::llm::LlmClient;
use crate::memory::{recent_turns, Message};
use crate::responders::{
    fragment_stream, Dependency, DomainProfile, FragmentSink, FragmentStream, ProduceError,
    Responder,
};
use crate::tools::ToolExecutor;

#[derive(Clone)]
pub struct DomainResponder {
    profile: Arc<DomainProfile>,
    llm: Arc<dyn LlmClient>,
    tools: Arc<ToolExecutor>,
    history_turns: usize,
}

impl DomainResponder {
    pub fn new(
        profile: DomainProfile,
        llm: Arc<dyn LlmClient>,
        tools: Arc<ToolExecutor>,
        history_turns: usize,
    ) -> Self {
        Self {
            profile: Arc::new(profile),
            llm,
            tools,
            history_turns,
        }
    }

    pub fn profile(&self) -> &DomainProfile {
        &self.profile
    }

    async fn produce(
        self,
        request: Arc<Request>,
        memory_context: Vec<String>,
        sink: FragmentSink,
    ) -> Result<(), ProduceError> {
        sink.emit(Fragment::status(self.profile.status.clone())).await?;

        let mut tool_context = None;
        if let Some(binding) = &self.profile.tool {
            let args = serde_json::json!({ "query": binding.query_for(&request.message) });
            let result = tokio::select! {
                _ = sink.token().cancelled() => return Err(ProduceError::Stopped),
                r = self.tools.execute(&binding.name, args) => r,
            };
            match result {
                Ok(text) => tool_context = Some(text),
                Err(e) if binding.essential => {
                    tracing::warn!(domain = %self.profile.name, error = %e, "Essential tool failed");
                    return Err(ProduceError::Failed(e.to_string()));
                }
                Err(e) => {
                    tracing::warn!(domain = %self.profile.name, error = %e, "Tool failed, answering without it");
                    sink.emit(Fragment::warning(e.to_string())).await?;
                }
            }
        }

        let messages = build_prompt(
            &self.profile,
            &request,
            &memory_context,
            tool_context.as_deref(),
            self.history_turns,
        );

        let mut tokens = tokio::select! {
            _ = sink.token().cancelled() => return Err(ProduceError::Stopped),
            r = self.llm.complete_stream(&messages) => {
                r.map_err(|e| ProduceError::Failed(format!("LLM request failed: {}", e)))?
            }
        };

        let mut produced = false;
        loop {
            let next = tokio::select! {
                _ = sink.token().cancelled() => return Err(ProduceError::Stopped),
                n = tokens.next() => n,
            };
            match next {
                None => break,
                Some(Ok(token)) => {
                    sink.emit(Fragment::content(token)).await?;
                    produced = true;
                }
                Some(Err(e)) => {
                    return Err(ProduceError::Failed(format!("LLM stream failed: {}", e)));
                }
            }
        }
        if !produced {
            sink.emit(Fragment::content(
                "I couldn't come up with an answer for that. Could you rephrase?",
            ))
            .await?;
        }
        Ok(())
    }
}

/// 组装发给 LLM 的消息：角色设定 + 记忆 + 工具结果作为 system，随后是最近轮次与本次提问
pub fn build_prompt(
    profile: &DomainProfile,
    request: &Request,
    memory_context: &[String],
    tool_context: Option<&str>,
    history_turns: usize,
) -> Vec<Message> {
    let mut system = profile.persona.trim().to_string();
    if !memory_context.is_empty() {
        system.push_str("\n\nWhat you remember about this user:");
        for m in memory_context {
            system.push_str("\n- ");
            system.push_str(m);
        }
    }
    if let Some(ctx) = tool_context {
        system.push_str("\n\nSearch results:\n");
        system.push_str(ctx);
    }

    let mut messages = Vec::with_capacity(history_turns + 2);
    messages.push(Message::system(system));
    messages.extend(recent_turns(&request.history, history_turns).iter().cloned());
    messages.push(Message::user(request.message.clone()));
    messages
}

impl Responder for DomainResponder {
    fn stream(
        &self,
        request: Arc<Request>,
        memory_context: Vec<String>,
        cancel: CancellationToken,
    ) -> FragmentStream {
        let this = self.clone();
        fragment_stream(cancel, move |sink| this.produce(request, memory_context, sink))
    }

    fn dependencies(&self) -> Vec<Dependency> {
        let mut deps = vec![Dependency {
            name: format!("llm:{}", self.llm.describe()),
            ready: true,
            essential: true,
        }];
        if let Some(binding) = &self.profile.tool {
            deps.push(Dependency {
                name: format!("tool:{}", binding.name),
                ready: self.tools.is_ready(&binding.name),
                essential: binding.essential,
            });
        }
        deps
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::MockLlmClient;
    use crate::responders::ToolBinding;
    use crate::tools::{Tool, ToolRegistry};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::time::Duration;

    struct FixedTool(Result<String, String>);

    #[async_trait]
    impl Tool for FixedTool {
        fn name(&self) -> &str {
            "job_search"
        }
        fn description(&self) -> &str {
            "fixed"
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            self.0.clone()
        }
    }

    fn profile(essential: bool) -> DomainProfile {
        DomainProfile {
            name: "jobs".to_string(),
            status: "Searching jobs".to_string(),
            persona: "You are a recruiter.".to_string(),
            memory_label: "Job Search".to_string(),
            tool: Some(ToolBinding {
                name: "job_search".to_string(),
                query_suffix: None,
                essential,
            }),
        }
    }

    fn responder(tool: Option<FixedTool>, essential: bool, llm: MockLlmClient) -> DomainResponder {
        let mut reg = ToolRegistry::new();
        if let Some(t) = tool {
            reg.register(t);
        }
        DomainResponder::new(
            profile(essential),
            Arc::new(llm),
            Arc::new(ToolExecutor::new(reg, Duration::from_secs(1))),
            4,
        )
    }

    async fn run(r: &DomainResponder) -> Vec<Fragment> {
        r.stream(
            Arc::new(Request::new("u", "Find remote Python jobs")),
            vec![],
            CancellationToken::new(),
        )
        .collect()
        .await
    }

    #[tokio::test]
    async fn test_happy_path_streams_status_then_content() {
        let r = responder(
            Some(FixedTool(Ok("- Rust dev at Acme".to_string()))),
            false,
            MockLlmClient::new().with_reply("Here are jobs"),
        );
        let out = run(&r).await;
        assert_eq!(out[0], Fragment::status("Searching jobs"));
        let text: String = out
            .iter()
            .filter_map(|f| match f {
                Fragment::Content { text } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(text, "Here are jobs");
        assert!(out.iter().all(|f| !f.is_terminal()));
    }

    #[tokio::test]
    async fn test_unregistered_non_essential_tool_degrades() {
        let r = responder(None, false, MockLlmClient::new().with_reply("partial"));
        let out = run(&r).await;
        assert!(matches!(&out[1], Fragment::Error { recoverable: true, message } if message.contains("not registered")));
        assert_eq!(out.last(), Some(&Fragment::content("partial")));
    }

    #[tokio::test]
    async fn test_essential_tool_failure_is_terminal() {
        let r = responder(
            Some(FixedTool(Err("HTTP 500".to_string()))),
            true,
            MockLlmClient::new(),
        );
        let out = run(&r).await;
        assert_eq!(out.len(), 2);
        assert_eq!(out[1], Fragment::fatal("Tool job_search failed: HTTP 500"));
    }

    #[tokio::test]
    async fn test_llm_failure_is_terminal() {
        let r = responder(
            Some(FixedTool(Ok(String::new()))),
            false,
            MockLlmClient::new().failing(),
        );
        let out = run(&r).await;
        assert!(out.last().unwrap().is_terminal());
    }

    #[test]
    fn test_prompt_layout() {
        let req = Request::new("u", "now?").with_history(vec![
            Message::user("one"),
            Message::assistant("two"),
            Message::user("three"),
        ]);
        let msgs = build_prompt(&profile(false), &req, &["likes Rust".to_string()], Some("- hit"), 2);
        assert_eq!(msgs.len(), 4);
        assert!(msgs[0].content.contains("likes Rust"));
        assert!(msgs[0].content.contains("- hit"));
        assert_eq!(msgs[1], Message::assistant("two"));
        assert_eq!(msgs[3], Message::user("now?"));
    }

    #[test]
    fn test_dependencies_report_tool_readiness() {
        let r = responder(None, true, MockLlmClient::new());
        let deps = r.dependencies();
        assert_eq!(deps.len(), 2);
        assert!(!deps[1].ready);
        assert!(deps[1].essential);
    }
}

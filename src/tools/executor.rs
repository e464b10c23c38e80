//! 工具执行器
//!
//! 持有 ToolRegistry 与单次调用超时，execute(tool_name, args) 在超时内调用 registry.execute，
//! 未注册、失败或超时都转为 ConciergeError::ToolFailure；每次调用输出结构化审计日志（JSON）。

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time::timeout;

use crate::core::ConciergeError;
use crate::tools::{Tool, ToolRegistry};

pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout: Duration) -> Self {
        Self { registry, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn execute(
        &self,
        tool_name: &str,
        args: serde_json::Value,
    ) -> Result<String, ConciergeError> {
        if !self.registry.contains(tool_name) {
            tracing::warn!(tool = %tool_name, "Tool not registered");
            return Err(ConciergeError::ToolFailure {
                tool: tool_name.to_string(),
                reason: "not registered".to_string(),
            });
        }

        let start = Instant::now();
        let args_preview = args_preview(&args);
        let result = timeout(self.timeout, self.registry.execute(tool_name, args)).await;

        let (ok, outcome): (bool, &str) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit.to_string(), "tool");

        match result {
            Ok(Ok(content)) => Ok(content),
            Ok(Err(reason)) => Err(ConciergeError::ToolFailure {
                tool: tool_name.to_string(),
                reason,
            }),
            Err(_) => Err(ConciergeError::ToolFailure {
                tool: tool_name.to_string(),
                reason: format!("timed out after {:?}", self.timeout),
            }),
        }
    }

    pub fn get_tool(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.registry.get(name)
    }

    /// 工具已注册且依赖就绪
    pub fn is_ready(&self, name: &str) -> bool {
        self.registry
            .get(name)
            .map(|t| t.is_configured())
            .unwrap_or(false)
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }
}

fn args_preview(args: &serde_json::Value) -> String {
    let s = args.to_string();
    if s.chars().count() > 200 {
        format!("{}...", s.chars().take(200).collect::<String>())
    } else {
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps"
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".to_string())
        }
    }

    struct Broken;

    #[async_trait]
    impl Tool for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            Err("HTTP 503".to_string())
        }
    }

    fn executor() -> ToolExecutor {
        let mut reg = ToolRegistry::new();
        reg.register(Slow);
        reg.register(Broken);
        ToolExecutor::new(reg, Duration::from_millis(50))
    }

    #[tokio::test]
    async fn test_timeout_maps_to_tool_failure() {
        let err = executor().execute("slow", json!({})).await.unwrap_err();
        match err {
            ConciergeError::ToolFailure { tool, reason } => {
                assert_eq!(tool, "slow");
                assert!(reason.contains("timed out"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_error_and_unknown_map_to_tool_failure() {
        let ex = executor();
        let err = ex.execute("broken", json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "Tool broken failed: HTTP 503");

        let err = ex.execute("missing", json!({})).await.unwrap_err();
        assert_eq!(err.to_string(), "Tool missing failed: not registered");
        assert!(!ex.is_ready("missing"));
        assert!(ex.is_ready("broken"));
    }
}

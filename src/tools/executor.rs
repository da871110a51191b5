//! 工具分发器
//!
//! 持有只读的 ToolRegistry、单次调用超时与重试策略。dispatch(name, args)：
//! 未注册或参数校验失败 → Validation（处理函数不会被调用，也不重试）；
//! 执行失败 / 超时 → 按策略重试，耗尽后 ToolExecution。每次分发输出一条 JSON 审计日志。

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::time::timeout;

use crate::core::{AgentError, RetryPolicy};
use crate::tools::{ToolRegistry, ToolSpec};

/// 一次成功的工具调用
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResult {
    pub name: String,
    pub content: String,
}

pub struct ToolDispatcher {
    registry: Arc<ToolRegistry>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl ToolDispatcher {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry: Arc::new(registry),
            timeout: Duration::from_secs(timeout_secs.max(1)),
            retry: RetryPolicy::no_retry(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn specs(&self) -> Vec<ToolSpec> {
        self.registry.specs()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.registry.tool_names()
    }

    /// 校验并执行工具
    pub async fn dispatch(&self, name: &str, args: Value) -> Result<ToolResult, AgentError> {
        let start = Instant::now();
        let preview = args_preview(&args);

        let Some(handler) = self.registry.get(name) else {
            audit(name, "unknown_tool", start, &preview);
            return Err(AgentError::Validation {
                tool: name.to_string(),
                reason: format!("unknown tool '{name}'"),
            });
        };
        if let Err(reason) = handler.validate(&args) {
            audit(name, "invalid_args", start, &preview);
            return Err(AgentError::Validation {
                tool: name.to_string(),
                reason,
            });
        }

        let limit = self.timeout;
        let result = self
            .retry
            .run(
                name,
                move || {
                    let handler = handler.clone();
                    let args = args.clone();
                    async move {
                        match timeout(limit, handler.execute(args)).await {
                            Ok(r) => r,
                            Err(_) => Err(format!("timed out after {} ms", limit.as_millis())),
                        }
                    }
                },
                |_| true,
            )
            .await;

        match result {
            Ok(content) => {
                audit(name, "ok", start, &preview);
                Ok(ToolResult {
                    name: name.to_string(),
                    content,
                })
            }
            Err(reason) => {
                audit(name, "error", start, &preview);
                Err(AgentError::ToolExecution {
                    tool: name.to_string(),
                    reason,
                })
            }
        }
    }
}

fn audit(tool: &str, outcome: &str, start: Instant, args_preview: &str) {
    let audit = serde_json::json!({
        "event": "tool_audit",
        "tool": tool,
        "ok": outcome == "ok",
        "outcome": outcome,
        "duration_ms": start.elapsed().as_millis() as u64,
        "args_preview": args_preview,
    });
    tracing::info!(audit = %audit, "tool");
}

fn args_preview(args: &Value) -> String {
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
    use crate::tools::ToolHandler;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counting {
        calls: Arc<AtomicUsize>,
        fail: bool,
        delay: Duration,
    }

    #[async_trait]
    impl ToolHandler for Counting {
        fn name(&self) -> &str {
            "counting"
        }
        fn description(&self) -> &str {
            "counts invocations"
        }
        fn validate(&self, args: &Value) -> Result<(), String> {
            if args.get("ok").is_some() {
                Ok(())
            } else {
                Err("missing field `ok`".to_string())
            }
        }
        async fn execute(&self, _args: Value) -> Result<String, String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                Err("upstream 503".to_string())
            } else {
                Ok("done".to_string())
            }
        }
    }

    fn dispatcher(fail: bool, delay: Duration) -> (ToolDispatcher, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ToolRegistry::new();
        registry.register(Counting {
            calls: calls.clone(),
            fail,
            delay,
        });
        (ToolDispatcher::new(registry, 5), calls)
    }

    #[tokio::test]
    async fn test_validation_failure_never_invokes_handler() {
        let (d, calls) = dispatcher(false, Duration::ZERO);
        let err = d.dispatch("counting", json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::Validation { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_tool_is_validation_error() {
        let (d, _) = dispatcher(false, Duration::ZERO);
        let err = d.dispatch("nope", json!({})).await.unwrap_err();
        assert!(matches!(err, AgentError::Validation { ref tool, .. } if tool == "nope"));
    }

    #[tokio::test]
    async fn test_success_returns_content() {
        let (d, calls) = dispatcher(false, Duration::ZERO);
        let res = d.dispatch("counting", json!({"ok": true})).await.unwrap();
        assert_eq!(res.content, "done");
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failure_is_retried_then_reported() {
        let (d, calls) = dispatcher(true, Duration::ZERO);
        let d = d.with_retry(RetryPolicy::new(3, 1));
        let err = d.dispatch("counting", json!({"ok": true})).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolExecution { ref reason, .. } if reason.contains("503")));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_slow_handler_times_out() {
        let (d, _) = dispatcher(false, Duration::from_secs(5));
        let d = d.with_timeout(Duration::from_millis(20));
        let err = d.dispatch("counting", json!({"ok": true})).await.unwrap_err();
        assert!(matches!(err, AgentError::ToolExecution { ref reason, .. } if reason.contains("timed out")));
    }
}

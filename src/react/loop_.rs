//! 工具调用主循环
//!
//! 模型 → 工具 → 模型，最多 max_iterations 次带工具的模型调用；仍无答案时再做一次
//! 不提供工具的总结调用。同一批工具调用并发执行（上限 max_parallel_tools），结果按请求顺序回填。
//! 工具失败以错误文本反馈给模型，不中止本轮；模型调用重试耗尽才是致命错误。

use futures_util::stream::{self, StreamExt};

use crate::core::state::{AgentPhase, PhaseTrail};
use crate::core::{AgentError, RetryPolicy};
use crate::llm::{LlmClient, LlmError, Message, ModelReply, ToolCall};
use crate::react::prompt::SYNTHESIS_PROMPT;
use crate::session::Turn;
use crate::tools::{ToolDispatcher, ToolSpec};

/// 循环结果：最终回答、需暂存到会话的工具 turn、实际调用过的工具
#[derive(Debug)]
pub struct LoopOutcome {
    pub answer: String,
    pub tool_turns: Vec<Turn>,
    /// 处理函数被调用过的工具（去重，保持首次出现的顺序）
    pub tools_used: Vec<String>,
}

pub struct ToolLoop<'a> {
    pub llm: &'a dyn LlmClient,
    pub dispatcher: &'a ToolDispatcher,
    pub retry: &'a RetryPolicy,
    pub max_iterations: usize,
    pub max_parallel_tools: usize,
}

impl<'a> ToolLoop<'a> {
    pub async fn run(&self, mut messages: Vec<Message>, trail: &mut PhaseTrail) -> Result<LoopOutcome, AgentError> {
        let specs = self.dispatcher.specs();
        let mut tool_turns = Vec::new();
        let mut tools_used: Vec<String> = Vec::new();

        for iteration in 1..=self.max_iterations.max(1) {
            trail.advance(AgentPhase::ModelCall);
            let reply = self.call_model(&messages, &specs).await?;
            let calls = match reply {
                ModelReply::Answer(answer) => {
                    trail.advance(AgentPhase::FinalAnswer);
                    return finish(answer, tool_turns, tools_used);
                }
                ModelReply::ToolCalls(calls) if calls.is_empty() => {
                    return Err(AgentError::ModelCall("model returned an empty tool call list".to_string()));
                }
                ModelReply::ToolCalls(calls) => calls,
            };

            trail.advance(AgentPhase::ToolRequested);
            tracing::info!(
                iteration,
                tools = ?calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
                "model requested tools"
            );
            messages.push(Message::assistant_tool_calls(calls.clone()));

            trail.advance(AgentPhase::ToolExecution);
            let results = self.execute_all(&calls).await;
            for (call, result) in calls.into_iter().zip(results) {
                let (turn, content) = match result {
                    Ok(content) => {
                        remember(&mut tools_used, &call.name);
                        let turn = Turn::tool_success(&call.id, &call.name, call.args.clone(), content.clone());
                        (turn, content)
                    }
                    Err(e) => {
                        if matches!(e, AgentError::ToolExecution { .. }) {
                            remember(&mut tools_used, &call.name);
                        }
                        let reason = e.to_string();
                        let turn = Turn::tool_failure(&call.id, &call.name, call.args.clone(), &reason);
                        let content = turn.content.clone();
                        (turn, content)
                    }
                };
                messages.push(Message::tool(call.id, call.name, content));
                tool_turns.push(turn);
            }
        }

        // 达到上限仍无答案：不再提供工具，要求模型总结
        tracing::info!(max_iterations = self.max_iterations, "tool loop bound reached, forcing synthesis");
        trail.advance(AgentPhase::ModelCall);
        messages.push(Message::user(SYNTHESIS_PROMPT));
        match self.call_model(&messages, &[]).await? {
            ModelReply::Answer(answer) => {
                trail.advance(AgentPhase::FinalAnswer);
                finish(answer, tool_turns, tools_used)
            }
            ModelReply::ToolCalls(_) => Err(AgentError::ModelCall(
                "model kept requesting tools after the iteration limit".to_string(),
            )),
        }
    }

    async fn call_model(&self, messages: &[Message], specs: &[ToolSpec]) -> Result<ModelReply, AgentError> {
        self.retry
            .run_with_hint(
                "llm",
                || self.llm.complete(messages, specs),
                LlmError::is_retryable,
                LlmError::retry_after,
            )
            .await
            .map_err(AgentError::from)
    }

    /// 每个 future 持有自己的 ToolCall，外层 chat future 才能满足 Send
    async fn execute_all(&self, calls: &[ToolCall]) -> Vec<Result<String, AgentError>> {
        let dispatcher = self.dispatcher;
        stream::iter(calls.to_vec().into_iter().map(move |call| async move {
            dispatcher.dispatch(&call.name, call.args).await.map(|r| r.content)
        }))
        .buffered(self.max_parallel_tools.max(1))
        .collect()
        .await
    }
}

fn remember(tools_used: &mut Vec<String>, name: &str) {
    if !tools_used.iter().any(|t| t == name) {
        tools_used.push(name.to_string());
    }
}

fn finish(answer: String, tool_turns: Vec<Turn>, tools_used: Vec<String>) -> Result<LoopOutcome, AgentError> {
    let answer = answer.trim().to_string();
    if answer.is_empty() {
        return Err(AgentError::ModelCall("model returned an empty answer".to_string()));
    }
    Ok(LoopOutcome {
        answer,
        tool_turns,
        tools_used,
    })
}

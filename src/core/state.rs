//! 单轮对话的状态机阶段
//!
//! CollectingContext → ModelCall → (ToolRequested → ToolExecution → ModelCall)* → FinalAnswer → Done

use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentPhase {
    /// 取会话、检索上下文、拼 prompt
    CollectingContext,
    ModelCall,
    ToolRequested,
    ToolExecution,
    FinalAnswer,
    /// 已提交并打检查点
    Done,
}

impl AgentPhase {
    /// 合法的下一阶段
    pub fn can_advance_to(self, next: AgentPhase) -> bool {
        use AgentPhase::*;
        matches!(
            (self, next),
            (CollectingContext, ModelCall)
                | (ModelCall, ToolRequested)
                | (ModelCall, FinalAnswer)
                | (ToolRequested, ToolExecution)
                | (ToolExecution, ModelCall)
                | (FinalAnswer, Done)
        )
    }
}

/// 一轮对话经过的阶段序列
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct PhaseTrail(Vec<AgentPhase>);

impl PhaseTrail {
    pub fn new() -> Self {
        Self(vec![AgentPhase::CollectingContext])
    }

    /// 追加阶段；非法转换只记日志（阶段仅用于观测，不影响控制流）
    pub fn advance(&mut self, next: AgentPhase) {
        if let Some(&last) = self.0.last() {
            if !last.can_advance_to(next) {
                tracing::warn!(from = ?last, to = ?next, "unexpected phase transition");
            }
        }
        self.0.push(next);
    }

    pub fn current(&self) -> Option<AgentPhase> {
        self.0.last().copied()
    }

    pub fn phases(&self) -> &[AgentPhase] {
        &self.0
    }

    /// 本轮模型调用次数
    pub fn model_calls(&self) -> usize {
        self.0.iter().filter(|p| **p == AgentPhase::ModelCall).count()
    }
}

//! 回滚管理：检查点是 turns 的下标，回滚只是 Vec::truncate

use serde::Serialize;

use crate::core::AgentError;
use crate::session::store::SessionData;
use crate::session::turn::TurnRole;

/// 已提交的一轮对话结束时 turns 的长度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Checkpoint {
    pub turn_index: usize,
}

/// 回滚结果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RollbackOutcome {
    pub steps: usize,
    pub remaining_turns: usize,
    pub remaining_checkpoints: usize,
    /// 回滚后最后一条助手回答
    pub last_answer: Option<String>,
}

pub struct RollbackManager;

impl RollbackManager {
    /// 记录当前 turns 长度；只在助手回答提交后调用。长度未增长时不重复压栈
    pub fn checkpoint(data: &mut SessionData) -> Checkpoint {
        let cp = Checkpoint {
            turn_index: data.turns.len(),
        };
        match data.checkpoints.last() {
            Some(top) if top.turn_index >= cp.turn_index => {
                tracing::warn!(turn_index = cp.turn_index, "checkpoint not advanced, skipped");
            }
            _ => data.checkpoints.push(cp),
        }
        cp
    }

    /// 弹出 steps 个检查点并截断到新的栈顶；全部弹出时截断为空。
    /// 栈为空、steps 为 0 或超过栈深时返回错误，会话不变
    pub fn rollback(data: &mut SessionData, steps: usize) -> Result<RollbackOutcome, AgentError> {
        let depth = data.checkpoints.len();
        if depth == 0 {
            return Err(AgentError::Rollback("no checkpoints to roll back".to_string()));
        }
        if steps == 0 || steps > depth {
            return Err(AgentError::Rollback(format!(
                "steps must be between 1 and {depth}, got {steps}"
            )));
        }

        data.checkpoints.truncate(depth - steps);
        let new_len = data.checkpoints.last().map(|c| c.turn_index).unwrap_or(0);
        data.turns.truncate(new_len);
        data.touch();

        Ok(RollbackOutcome {
            steps,
            remaining_turns: data.turns.len(),
            remaining_checkpoints: data.checkpoints.len(),
            last_answer: Self::last_answer(data),
        })
    }

    pub fn last_answer(data: &SessionData) -> Option<String> {
        data.turns
            .iter()
            .rev()
            .find(|t| t.role == TurnRole::Assistant)
            .map(|t| t.content.clone())
    }
}

//! Agent 错误类型
//!
//! 工具与 RAG 失败在编排器内部被吸收（反馈给模型或降级）；只有模型调用重试耗尽、
//! 模型无法给出答案等情况才会作为错误返回给用户，此时本轮不会提交到会话。

use thiserror::Error;

use crate::llm::LlmError;

/// 编排过程中可能出现的错误
#[derive(Error, Debug)]
pub enum AgentError {
    /// 显式传入的会话 ID 不存在且调用方禁止自动创建
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// 会话正被另一个请求持有（单写者约束）
    #[error("Session is busy: {0}")]
    SessionBusy(String),

    /// 工具参数未通过 schema 校验，或工具未注册；处理函数不会被调用
    #[error("Invalid arguments for tool '{tool}': {reason}")]
    Validation { tool: String, reason: String },

    /// 工具执行失败或超时（可恢复，会反馈给模型）
    #[error("Tool '{tool}' failed: {reason}")]
    ToolExecution { tool: String, reason: String },

    /// 模型调用在重试后仍失败，或模型无法给出答案（本轮致命）
    #[error("Model call failed: {0}")]
    ModelCall(String),

    /// 检查点不足，无法回滚
    #[error("Rollback failed: {0}")]
    Rollback(String),

    /// 检索增强不可用（仅用于日志，编排器降级为无上下文）
    #[error("RAG unavailable: {0}")]
    RagUnavailable(String),

    /// 请求本身不合法（空问题、非法地名等）
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("Config error: {0}")]
    Config(String),
}

impl AgentError {
    /// 对外暴露的错误码（HTTP 响应体中的 `error` 字段）
    pub fn code(&self) -> &'static str {
        match self {
            AgentError::SessionNotFound(_) => "session_not_found",
            AgentError::SessionBusy(_) => "session_busy",
            AgentError::Validation { .. } => "validation_error",
            AgentError::ToolExecution { .. } => "tool_execution_error",
            AgentError::ModelCall(_) => "model_call_error",
            AgentError::Rollback(_) => "rollback_error",
            AgentError::RagUnavailable(_) => "rag_unavailable",
            AgentError::InvalidRequest(_) => "invalid_request",
            AgentError::Cancelled => "cancelled",
            AgentError::Config(_) => "config_error",
        }
    }

    /// 工具层错误（校验失败 / 执行失败）会以文本形式回灌给模型，而不是中止本轮
    pub fn is_tool_error(&self) -> bool {
        matches!(
            self,
            AgentError::Validation { .. } | AgentError::ToolExecution { .. }
        )
    }
}

impl From<LlmError> for AgentError {
    fn from(e: LlmError) -> Self {
        AgentError::ModelCall(e.to_string())
    }
}

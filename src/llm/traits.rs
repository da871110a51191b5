//! LLM 客户端抽象
//!
//! 所有后端（OpenAI 兼容 / 离线 Mock / 脚本化测试）实现 LlmClient：
//! 输入消息序列与可用工具的规格，返回最终回答或一个以上的工具调用请求。

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::tools::ToolSpec;

/// 消息角色（与 Chat Completions API 一致）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

/// 模型请求调用的一个工具
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// 调用 ID，工具结果消息通过它与请求对应
    pub id: String,
    pub name: String,
    pub args: serde_json::Value,
}

/// 单条消息；assistant 消息可携带 tool_calls，tool 消息携带 tool_call_id
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    fn plain(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            name: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(Role::Assistant, content)
    }

    /// assistant 发起的工具调用（content 为空）
    pub fn assistant_tool_calls(calls: Vec<ToolCall>) -> Self {
        Self {
            tool_calls: calls,
            ..Self::plain(Role::Assistant, "")
        }
    }

    /// 某次工具调用的结果
    pub fn tool(call_id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: Some(call_id.into()),
            name: Some(name.into()),
            ..Self::plain(Role::Tool, content)
        }
    }
}

/// 模型一次调用的结果
#[derive(Debug, Clone, PartialEq)]
pub enum ModelReply {
    /// 最终回答
    Answer(String),
    /// 请求执行工具
    ToolCalls(Vec<ToolCall>),
}

/// 模型调用错误；is_retryable 决定统一重试策略是否再试
#[derive(Error, Debug, Clone)]
pub enum LlmError {
    #[error("Request timed out")]
    Timeout,

    #[error("Rate limited (retry after {retry_after_ms} ms)")]
    RateLimited { retry_after_ms: u64 },

    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl LlmError {
    /// 超时、限流、5xx、网络错误可重试；4xx 与响应格式错误不重试
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Timeout | LlmError::RateLimited { .. } | LlmError::Transport(_) => true,
            LlmError::Http { status, .. } => *status >= 500,
            LlmError::InvalidResponse(_) => false,
        }
    }

    /// 服务端要求的最短等待时间（仅 429）
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimited { retry_after_ms } => Some(Duration::from_millis(*retry_after_ms)),
            _ => None,
        }
    }
}

/// LLM 客户端 trait
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// tools 为空时模型只能直接回答（用于强制总结）
    async fn complete(&self, messages: &[Message], tools: &[ToolSpec]) -> Result<ModelReply, LlmError>;

    /// 模型名（用于 /chat/models 与日志）
    fn model_name(&self) -> &str {
        "unknown"
    }
}

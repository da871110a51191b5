//! 会话中的一条记录：用户问题、助手回答或一次工具调用

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Assistant,
    Tool,
}

/// 追加后不可变，只能被回滚截断
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    /// user / assistant 的文本；tool turn 为结果或错误文本
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_args: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_ok: Option<bool>,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    fn new(role: TurnRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_name: None,
            tool_args: None,
            tool_result: None,
            tool_call_id: None,
            tool_ok: None,
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(TurnRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(TurnRole::Assistant, content)
    }

    /// 工具调用成功
    pub fn tool_success(call_id: &str, name: &str, args: Value, result: String) -> Self {
        Self {
            tool_name: Some(name.to_string()),
            tool_args: Some(args),
            tool_result: Some(result.clone()),
            tool_call_id: Some(call_id.to_string()),
            tool_ok: Some(true),
            ..Self::new(TurnRole::Tool, result)
        }
    }

    /// 工具调用失败：错误文本作为 content 反馈给模型
    pub fn tool_failure(call_id: &str, name: &str, args: Value, error: &str) -> Self {
        Self {
            tool_name: Some(name.to_string()),
            tool_args: Some(args),
            tool_call_id: Some(call_id.to_string()),
            tool_ok: Some(false),
            ..Self::new(TurnRole::Tool, format!("Error: {error}"))
        }
    }

    pub fn is_tool(&self) -> bool {
        self.role == TurnRole::Tool
    }
}

//! HTTP 请求 / 响应体

use serde::{Deserialize, Serialize};

use crate::session::{RollbackOutcome, Turn};

/// 单次回滚允许的最大步数
pub const MAX_ROLLBACK_STEPS: usize = 10;

fn default_steps() -> usize {
    1
}

/// POST /chat/rollback/:id?steps=N
#[derive(Debug, Deserialize)]
pub struct RollbackQuery {
    #[serde(default = "default_steps")]
    pub steps: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct RollbackResponse {
    pub session_id: String,
    pub steps: usize,
    pub last_answer: Option<String>,
    pub remaining_turns: usize,
    pub remaining_checkpoints: usize,
}

impl RollbackResponse {
    pub fn new(session_id: &str, outcome: RollbackOutcome) -> Self {
        Self {
            session_id: session_id.to_string(),
            steps: outcome.steps,
            last_answer: outcome.last_answer,
            remaining_turns: outcome.remaining_turns,
            remaining_checkpoints: outcome.remaining_checkpoints,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub session_id: String,
    pub turns: Vec<Turn>,
}

/// DELETE /chat/session/:id 与 POST /chat/cancel/:id 的结果
#[derive(Debug, Serialize, Deserialize)]
pub struct AckResponse {
    pub session_id: String,
    /// 删除：会话是否存在；取消：是否有进行中的请求被取消
    pub ok: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ModelsResponse {
    pub model: String,
    pub tools: Vec<String>,
    pub rag_enabled: bool,
}

/// GET /chat/stats：知识库状态
#[derive(Debug, Serialize, Deserialize)]
pub struct StatsResponse {
    pub rag_enabled: bool,
    /// 已索引的知识块数
    pub total_chunks: usize,
    pub sessions: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub sessions: usize,
}

/// 错误响应体：`error` 为机器可读的错误码
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

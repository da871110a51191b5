//! 对话编排器
//!
//! 一次 chat 请求 = 一轮（pass）：取会话并独占 → 检索上下文 → 拼 prompt → 模型/工具循环 →
//! 把本轮所有 turn 一次性提交并打检查点。提交前任何失败（模型重试耗尽、取消、请求被丢弃）
//! 都不会改动会话。

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::core::state::{AgentPhase, PhaseTrail};
use crate::core::{AgentError, RetryPolicy};
use crate::llm::LlmClient;
use crate::rag::{MetadataFilter, Retrieval, RetrievalAugmentor, Source};
use crate::react::prompt::{AGENT_SYSTEM_PROMPT, SPEECH_SYSTEM_PROMPT};
use crate::react::{build_messages, FarmerProfile, ToolLoop};
use crate::session::{RollbackManager, RollbackOutcome, SessionGuard, SessionStore, Turn};
use crate::tools::sanitize::{sanitize_crop, sanitize_name, sanitize_optional};
use crate::tools::ToolDispatcher;

/// 单次请求可指定的 top_k 上限
const MAX_TOP_K: usize = 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatMode {
    /// /chat
    Text,
    /// /chat/speech：总是检索，回答更短
    Speech,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatRequest {
    pub query: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub language: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub crop: Option<String>,
    /// 检索条数（默认取配置）
    #[serde(default)]
    pub top_k: Option<usize>,
    /// 检索时的 metadata 等值过滤
    #[serde(default)]
    pub metadata_filter: Option<MetadataFilter>,
    /// 文字模式下是否检索知识库（缺省取配置）；语音模式总是检索
    #[serde(default)]
    pub use_context: Option<bool>,
}

impl ChatRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ChatResponse {
    pub answer: String,
    pub session_id: String,
    pub has_context: bool,
    pub tools_used: Vec<String>,
    pub sources: Vec<Source>,
    #[serde(skip)]
    pub phases: PhaseTrail,
}

/// 编排参数（来自 [agent] 与 [rag]）
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub max_tool_iterations: usize,
    pub max_parallel_tools: usize,
    pub max_history_turns: usize,
    pub lock_wait: Duration,
    pub speech_max_answer_chars: usize,
    pub max_query_chars: usize,
    pub rag_enabled: bool,
    pub top_k: usize,
    pub speech_top_k: usize,
}

impl Default for OrchestratorSettings {
    fn default() -> Self {
        Self::from(&AppConfig::default())
    }
}

impl From<&AppConfig> for OrchestratorSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            max_tool_iterations: cfg.agent.max_tool_iterations,
            max_parallel_tools: cfg.agent.max_parallel_tools,
            max_history_turns: cfg.agent.max_history_turns,
            lock_wait: Duration::from_secs(cfg.agent.lock_wait_secs),
            speech_max_answer_chars: cfg.agent.speech_max_answer_chars,
            max_query_chars: cfg.agent.max_query_chars,
            rag_enabled: cfg.rag.enabled,
            top_k: cfg.rag.top_k,
            speech_top_k: cfg.rag.speech_top_k,
        }
    }
}

/// 校验后的请求
struct Normalized {
    query: String,
    profile: FarmerProfile,
    top_k: Option<usize>,
    filter: Option<MetadataFilter>,
    use_context: Option<bool>,
}

pub struct Orchestrator {
    sessions: Arc<SessionStore>,
    dispatcher: Arc<ToolDispatcher>,
    llm: Arc<dyn LlmClient>,
    rag: Option<Arc<RetrievalAugmentor>>,
    llm_retry: RetryPolicy,
    settings: OrchestratorSettings,
}

impl Orchestrator {
    pub fn new(
        sessions: Arc<SessionStore>,
        dispatcher: Arc<ToolDispatcher>,
        llm: Arc<dyn LlmClient>,
        rag: Option<Arc<RetrievalAugmentor>>,
        llm_retry: RetryPolicy,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            sessions,
            dispatcher,
            llm,
            rag,
            llm_retry,
            settings,
        }
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn model_name(&self) -> &str {
        self.llm.model_name()
    }

    pub fn tool_names(&self) -> Vec<String> {
        self.dispatcher.tool_names()
    }

    pub fn rag_available(&self) -> bool {
        self.rag.is_some()
    }

    /// 知识库中已索引的块数；未启用检索时为 None
    pub async fn knowledge_chunks(&self) -> Option<usize> {
        match &self.rag {
            Some(rag) => Some(rag.store().len().await),
            None => None,
        }
    }

    /// 处理一次提问。会话在整轮期间被独占；取消令牌触发时返回 Cancelled 且会话不变。
    /// 本次新建的会话若第一轮就失败则被删除
    pub async fn chat(&self, req: ChatRequest, mode: ChatMode) -> Result<ChatResponse, AgentError> {
        let normalized = self.normalize(&req)?;
        let session = self.sessions.get_or_create(req.session_id.as_deref()).await;
        let fresh = req.session_id.as_deref() != Some(session.id.as_str());
        let mut guard = self.sessions.lock(&session, self.settings.lock_wait).await?;
        let token = session.new_cancel_token();

        let result = tokio::select! {
            biased;
            _ = token.cancelled() => {
                tracing::info!(session_id = %session.id, "request cancelled");
                Err(AgentError::Cancelled)
            }
            r = self.run_pass(&mut guard, normalized, mode) => r,
        };
        session.clear_cancel_token();

        if result.is_err() && fresh && guard.turns.is_empty() {
            drop(guard);
            self.sessions.delete(&session.id).await;
        }
        result
    }

    fn normalize(&self, req: &ChatRequest) -> Result<Normalized, AgentError> {
        let query = req.query.trim();
        if query.is_empty() {
            return Err(AgentError::InvalidRequest("query cannot be empty".to_string()));
        }
        if query.chars().count() > self.settings.max_query_chars {
            return Err(AgentError::InvalidRequest(format!(
                "query exceeds {} characters",
                self.settings.max_query_chars
            )));
        }
        let invalid = AgentError::InvalidRequest;
        let profile = FarmerProfile {
            language: sanitize_optional("language", req.language.as_deref(), sanitize_name).map_err(invalid)?,
            location: sanitize_optional("location", req.location.as_deref(), sanitize_name).map_err(invalid)?,
            crop: sanitize_optional("crop", req.crop.as_deref(), sanitize_crop).map_err(invalid)?,
        };
        if let Some(k) = req.top_k {
            if k > MAX_TOP_K {
                return Err(AgentError::InvalidRequest(format!("top_k must be at most {MAX_TOP_K}")));
            }
        }
        Ok(Normalized {
            query: query.to_string(),
            profile,
            top_k: req.top_k,
            filter: req.metadata_filter.clone().filter(|f| !f.is_empty()),
            use_context: req.use_context,
        })
    }

    async fn retrieve(&self, req: &Normalized, mode: ChatMode) -> Retrieval {
        let Some(rag) = &self.rag else {
            return Retrieval::default();
        };
        let wants_context = req
            .use_context
            .unwrap_or(self.settings.rag_enabled || req.top_k.is_some());
        let top_k = match mode {
            ChatMode::Speech => self.settings.speech_top_k,
            ChatMode::Text if wants_context => req.top_k.unwrap_or(self.settings.top_k),
            ChatMode::Text => return Retrieval::default(),
        };
        rag.retrieve(&req.query, top_k, req.filter.as_ref()).await
    }

    async fn run_pass(
        &self,
        guard: &mut SessionGuard,
        req: Normalized,
        mode: ChatMode,
    ) -> Result<ChatResponse, AgentError> {
        let mut trail = PhaseTrail::new();
        let retrieval = self.retrieve(&req, mode).await;
        let history = guard.recent(self.settings.max_history_turns);
        let system_prompt = match mode {
            ChatMode::Text => AGENT_SYSTEM_PROMPT,
            ChatMode::Speech => SPEECH_SYSTEM_PROMPT,
        };
        let messages = build_messages(system_prompt, &req.profile, &retrieval.context, &history, &req.query);

        let tool_loop = ToolLoop {
            llm: self.llm.as_ref(),
            dispatcher: &self.dispatcher,
            retry: &self.llm_retry,
            max_iterations: self.settings.max_tool_iterations,
            max_parallel_tools: self.settings.max_parallel_tools,
        };
        let outcome = tool_loop.run(messages, &mut trail).await.map_err(|e| {
            tracing::warn!(session_id = %guard.id(), error = %e, "pass failed, nothing committed");
            e
        })?;

        let answer = match mode {
            ChatMode::Text => outcome.answer,
            ChatMode::Speech => trim_for_speech(&outcome.answer, self.settings.speech_max_answer_chars),
        };

        // 本轮 turn 一次性提交
        guard.turns.push(Turn::user(req.query));
        guard.turns.extend(outcome.tool_turns);
        guard.turns.push(Turn::assistant(answer.clone()));
        let checkpoint = RollbackManager::checkpoint(guard);
        guard.touch();
        trail.advance(AgentPhase::Done);

        tracing::info!(
            session_id = %guard.id(),
            turns = checkpoint.turn_index,
            model_calls = trail.model_calls(),
            tools_used = ?outcome.tools_used,
            has_context = retrieval.has_context(),
            "pass committed"
        );

        Ok(ChatResponse {
            answer,
            session_id: guard.id().to_string(),
            has_context: retrieval.has_context(),
            tools_used: outcome.tools_used,
            sources: retrieval.sources,
            phases: trail,
        })
    }

    /// 回滚 steps 轮（每轮对应一个检查点）
    pub async fn rollback(&self, session_id: &str, steps: usize) -> Result<RollbackOutcome, AgentError> {
        let session = self.sessions.get(session_id, false).await?;
        let mut guard = self.sessions.lock(&session, self.settings.lock_wait).await?;
        let outcome = RollbackManager::rollback(&mut guard, steps)?;
        tracing::info!(
            session_id,
            steps,
            remaining_turns = outcome.remaining_turns,
            "session rolled back"
        );
        Ok(outcome)
    }

    /// 完整历史；会话正在处理请求时返回 SessionBusy
    pub async fn history(&self, session_id: &str) -> Result<Vec<Turn>, AgentError> {
        let session = self.sessions.get(session_id, false).await?;
        self.sessions.get_history(&session, usize::MAX)
    }

    pub async fn delete_session(&self, session_id: &str) -> bool {
        self.sessions.delete(session_id).await
    }

    /// 取消会话进行中的请求；没有进行中的请求时返回 false
    pub async fn cancel(&self, session_id: &str) -> Result<bool, AgentError> {
        self.sessions.cancel(session_id).await
    }
}

/// 语音回答截断：不超过 max_chars，尽量在句末断开
pub fn trim_for_speech(answer: &str, max_chars: usize) -> String {
    let answer = answer.trim();
    if max_chars == 0 || answer.chars().count() <= max_chars {
        return answer.to_string();
    }
    let prefix: String = answer.chars().take(max_chars).collect();
    let sentence_end = prefix
        .char_indices()
        .filter(|(_, c)| matches!(c, '.' | '!' | '?' | '।'))
        .map(|(i, c)| i + c.len_utf8())
        .last();
    match sentence_end {
        Some(end) if prefix[..end].chars().count() >= max_chars / 3 => prefix[..end].to_string(),
        _ => {
            let cut = prefix.rfind(char::is_whitespace).unwrap_or(prefix.len());
            format!("{}...", prefix[..cut].trim_end())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trim_for_speech_keeps_short_answers() {
        assert_eq!(trim_for_speech("  Sow in November.  ", 100), "Sow in November.");
    }

    #[test]
    fn test_trim_for_speech_cuts_at_sentence() {
        let answer = "Sow wheat in November. Irrigate after 21 days. Apply urea in two splits and watch for rust.";
        let trimmed = trim_for_speech(answer, 50);
        assert_eq!(trimmed, "Sow wheat in November. Irrigate after 21 days.");
    }

    #[test]
    fn test_trim_for_speech_falls_back_to_word_boundary() {
        let answer = "Wheat needs timely irrigation and balanced fertilizer for best yield in Punjab";
        let trimmed = trim_for_speech(answer, 30);
        assert!(trimmed.ends_with("..."));
        assert!(trimmed.chars().count() <= 33);
    }
}

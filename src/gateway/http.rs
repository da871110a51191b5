//! axum 路由
//!
//! 所有错误统一返回 `{error, message}`，状态码由 [`AgentError`] 的类别决定。

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};

use crate::core::{AgentError, ChatMode, ChatRequest, ChatResponse, Orchestrator};
use crate::gateway::message::{
    AckResponse, ErrorBody, HealthResponse, HistoryResponse, ModelsResponse, RollbackQuery, RollbackResponse,
    StatsResponse, MAX_ROLLBACK_STEPS,
};

pub type AppState = Arc<Orchestrator>;

/// 把 AgentError 包装成 HTTP 响应
#[derive(Debug)]
pub struct ApiError(pub AgentError);

impl From<AgentError> for ApiError {
    fn from(e: AgentError) -> Self {
        Self(e)
    }
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            AgentError::InvalidRequest(_) | AgentError::Validation { .. } => StatusCode::BAD_REQUEST,
            AgentError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            AgentError::SessionBusy(_) | AgentError::Rollback(_) => StatusCode::CONFLICT,
            AgentError::ModelCall(_) => StatusCode::BAD_GATEWAY,
            AgentError::Cancelled => StatusCode::REQUEST_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, code = self.0.code(), "request failed");
        } else {
            tracing::info!(error = %self.0, code = self.0.code(), "request rejected");
        }
        let body = ErrorBody {
            error: self.0.code().to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

pub fn router(orchestrator: Arc<Orchestrator>) -> Router {
    Router::new()
        .route("/chat", post(api_chat))
        .route("/chat/speech", post(api_chat_speech))
        .route("/chat/rollback/:session_id", post(api_rollback))
        .route("/chat/history/:session_id", get(api_history))
        .route("/chat/session/:session_id", delete(api_delete_session))
        .route("/chat/cancel/:session_id", post(api_cancel))
        .route("/chat/models", get(api_models))
        .route("/chat/stats", get(api_stats))
        .route("/health", get(api_health))
        .with_state(orchestrator)
}

async fn api_chat(
    State(agent): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    chat(agent, body, ChatMode::Text).await
}

async fn api_chat_speech(
    State(agent): State<AppState>,
    body: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Json<ChatResponse>, ApiError> {
    chat(agent, body, ChatMode::Speech).await
}

async fn chat(
    agent: AppState,
    body: Result<Json<ChatRequest>, JsonRejection>,
    mode: ChatMode,
) -> Result<Json<ChatResponse>, ApiError> {
    let Json(req) = body.map_err(|e| AgentError::InvalidRequest(e.body_text()))?;
    let response = agent.chat(req, mode).await?;
    Ok(Json(response))
}

async fn api_rollback(
    State(agent): State<AppState>,
    Path(session_id): Path<String>,
    query: Result<Query<RollbackQuery>, QueryRejection>,
) -> Result<Json<RollbackResponse>, ApiError> {
    let Query(query) = query.map_err(|e| AgentError::InvalidRequest(e.body_text()))?;
    if !(1..=MAX_ROLLBACK_STEPS).contains(&query.steps) {
        return Err(AgentError::InvalidRequest(format!("steps must be between 1 and {MAX_ROLLBACK_STEPS}")).into());
    }
    let outcome = agent.rollback(&session_id, query.steps).await?;
    Ok(Json(RollbackResponse::new(&session_id, outcome)))
}

async fn api_history(
    State(agent): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    let turns = agent.history(&session_id).await?;
    Ok(Json(HistoryResponse { session_id, turns }))
}

async fn api_delete_session(
    State(agent): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<AckResponse>, ApiError> {
    if !agent.delete_session(&session_id).await {
        return Err(AgentError::SessionNotFound(session_id).into());
    }
    Ok(Json(AckResponse { session_id, ok: true }))
}

async fn api_cancel(
    State(agent): State<AppState>,
    Path(session_id): Path<String>,
) -> Result<Json<AckResponse>, ApiError> {
    let ok = agent.cancel(&session_id).await?;
    Ok(Json(AckResponse { session_id, ok }))
}

async fn api_models(State(agent): State<AppState>) -> Json<ModelsResponse> {
    Json(ModelsResponse {
        model: agent.model_name().to_string(),
        tools: agent.tool_names(),
        rag_enabled: agent.rag_available(),
    })
}

async fn api_stats(State(agent): State<AppState>) -> Json<StatsResponse> {
    let chunks = agent.knowledge_chunks().await;
    Json(StatsResponse {
        rag_enabled: chunks.is_some(),
        total_chunks: chunks.unwrap_or(0),
        sessions: agent.sessions().len().await,
    })
}

async fn api_health(State(agent): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        sessions: agent.sessions().len().await,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (AgentError::InvalidRequest("x".into()), StatusCode::BAD_REQUEST),
            (AgentError::SessionNotFound("s".into()), StatusCode::NOT_FOUND),
            (AgentError::SessionBusy("s".into()), StatusCode::CONFLICT),
            (AgentError::Rollback("empty".into()), StatusCode::CONFLICT),
            (AgentError::ModelCall("down".into()), StatusCode::BAD_GATEWAY),
            (AgentError::Cancelled, StatusCode::REQUEST_TIMEOUT),
            (AgentError::Config("x".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, status) in cases {
            assert_eq!(ApiError(err).status(), status);
        }
    }
}

//! HTTP 网关：把编排器暴露为 REST 接口

pub mod http;
pub mod message;

pub use http::{router, ApiError, AppState};
pub use message::{ErrorBody, HealthResponse, HistoryResponse, ModelsResponse, RollbackResponse};

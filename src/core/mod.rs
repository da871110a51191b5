//! 核心编排层：错误与重试、阶段轨迹、主控编排器与组件构建

pub mod builder;
pub mod error;
pub mod orchestrator;
pub mod retry;
pub mod state;

pub use builder::AgentBuilder;
pub use error::AgentError;
pub use orchestrator::{trim_for_speech, ChatMode, ChatRequest, ChatResponse, Orchestrator, OrchestratorSettings};
pub use retry::RetryPolicy;
pub use state::{AgentPhase, PhaseTrail};

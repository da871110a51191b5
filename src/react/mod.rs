//! 推理层：prompt 组装与模型 ↔ 工具主循环

pub mod loop_;
pub mod prompt;

pub use loop_::{LoopOutcome, ToolLoop};
pub use prompt::{build_messages, FarmerProfile};
